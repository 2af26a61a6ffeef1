//! On-chain fee submission

pub mod contract;
pub mod errors;
pub mod evm;
pub mod submitter;

pub use contract::{FeeContract, TxReceipt};
pub use errors::ChainError;
pub use evm::{EvmFeeContract, EvmSettings};
pub use submitter::{ChainSubmitter, SubmitSettings};
