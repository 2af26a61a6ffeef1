//! EVM implementation of [`FeeContract`] on top of alloy

use super::contract::{FeeContract, TxReceipt};
use super::errors::ChainError;
use crate::types::TxHandle;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

alloy::sol! {
    interface IFeeOracleTarget {
        function setFeeRate(uint256 newFeeRate) external;
    }
}

/// Connection details for [`EvmFeeContract`]
#[derive(Debug, Clone)]
pub struct EvmSettings {
    pub rpc_url: String,
    pub chain_id: u64,
    pub contract: Address,
    pub gas_limit: u64,
}

/// Legacy gas-price transactions signed with a local key, sent over HTTP RPC
pub struct EvmFeeContract {
    provider: RootProvider<Http<Client>>,
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    settings: EvmSettings,
}

impl EvmFeeContract {
    pub fn new(settings: EvmSettings, signer: PrivateKeySigner) -> anyhow::Result<Self> {
        let url = settings
            .rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", settings.rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);
        let wallet = EthereumWallet::from(signer.clone());

        Ok(Self {
            provider,
            signer,
            wallet,
            settings,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn settings(&self) -> &EvmSettings {
        &self.settings
    }

    /// Chain id reported by the node, for the startup sanity check
    pub async fn remote_chain_id(&self) -> Result<u64, ChainError> {
        self.provider.get_chain_id().await.map_err(|e| ChainError::Rpc {
            operation: "chain_id",
            message: e.to_string(),
        })
    }
}

/// ABI-encoded `setFeeRate(rate_bps)` call
pub fn encode_set_fee_rate(rate_bps: u32) -> Vec<u8> {
    IFeeOracleTarget::setFeeRateCall {
        newFeeRate: U256::from(rate_bps),
    }
    .abi_encode()
}

#[async_trait]
impl FeeContract for EvmFeeContract {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider.get_gas_price().await.map_err(|e| ChainError::Rpc {
            operation: "gas_price",
            message: e.to_string(),
        })
    }

    async fn pending_nonce(&self) -> Result<u64, ChainError> {
        self.provider
            .get_transaction_count(self.signer.address())
            .pending()
            .await
            .map_err(|e| ChainError::Rpc {
                operation: "pending_nonce",
                message: e.to_string(),
            })
    }

    async fn send_fee_update(
        &self,
        rate_bps: u32,
        nonce: u64,
        gas_price: u128,
    ) -> Result<TxHandle, ChainError> {
        let request = TransactionRequest::default()
            .with_from(self.signer.address())
            .with_to(self.settings.contract)
            .with_input(encode_set_fee_rate(rate_bps))
            .with_chain_id(self.settings.chain_id)
            .with_nonce(nonce)
            .with_gas_limit(self.settings.gas_limit)
            .with_gas_price(gas_price);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;
        let raw = envelope.encoded_2718();

        debug!(nonce, gas_price, rate_bps, bytes = raw.len(), "Sending signed fee update");

        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| ChainError::Broadcast {
                reason: e.to_string(),
            })?;

        Ok(TxHandle::new(format!("{:#x}", pending.tx_hash())))
    }

    async fn receipt(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ChainError> {
        let hash: TxHash = tx
            .as_str()
            .parse()
            .map_err(|e| ChainError::Configuration(format!("malformed tx hash {tx}: {e}")))?;

        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ChainError::Rpc {
                operation: "receipt",
                message: e.to_string(),
            })?;

        Ok(receipt.map(|r| TxReceipt {
            success: r.status(),
            gas_used: Some(u64::try_from(r.gas_used).unwrap_or(u64::MAX)),
            block_number: r.block_number,
        }))
    }
}
