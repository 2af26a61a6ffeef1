//! Error types for on-chain submission

use crate::resilience::Retryable;
use crate::types::TxHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// RPC call failed before anything was broadcast
    #[error("RPC error during {operation}: {message}")]
    Rpc {
        operation: &'static str,
        message: String,
    },

    /// Node refused the transaction (nonce race, underpriced, dropped connection)
    #[error("Broadcast error: {reason}")]
    Broadcast { reason: String },

    /// Current gas price is above the configured ceiling
    #[error("Gas price {current_wei} wei exceeds ceiling {max_wei} wei")]
    GasPriceExceeded { current_wei: u128, max_wei: u128 },

    /// Transaction was included but execution reverted
    #[error("Transaction {tx} reverted on chain (gas used: {gas_used:?})")]
    Reverted { tx: TxHandle, gas_used: Option<u64> },

    /// No receipt within the confirmation window
    #[error("Transaction {tx} not confirmed after {waited:?}")]
    ConfirmationTimeout { tx: TxHandle, waited: Duration },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        match self {
            ChainError::Rpc { .. } => true,
            ChainError::Broadcast { .. } => true,
            ChainError::ConfirmationTimeout { .. } => true,

            ChainError::GasPriceExceeded { .. } => false,
            ChainError::Reverted { .. } => false,
            ChainError::Signing(_) => false,
            ChainError::Configuration(_) => false,
        }
    }
}
