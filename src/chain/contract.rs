//! On-chain fee capability

use super::errors::ChainError;
use crate::types::TxHandle;
use async_trait::async_trait;

/// Execution outcome of an included transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub success: bool,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
}

/// The contract entry point that accepts a new fee rate
///
/// Each method is a single RPC round trip. Retrying, nonce refresh and
/// confirmation polling are the submitter's job.
#[async_trait]
pub trait FeeContract: Send + Sync {
    /// Current network gas price in wei
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Next nonce for the signer, counting pending transactions
    async fn pending_nonce(&self) -> Result<u64, ChainError>;

    /// Sign and broadcast `setFeeRate(rate_bps)`
    async fn send_fee_update(
        &self,
        rate_bps: u32,
        nonce: u64,
        gas_price: u128,
    ) -> Result<TxHandle, ChainError>;

    /// `None` while the transaction is not yet included
    async fn receipt(&self, tx: &TxHandle) -> Result<Option<TxReceipt>, ChainError>;
}
