//! Fee Oracle - market index to on-chain fee rate bridge
//!
//! This library exposes the update pipeline and its components for the
//! binary, integration tests and benchmarks.

pub mod chain;
pub mod config;
pub mod endpoints;
pub mod extractor;
pub mod fee;
pub mod fetcher;
pub mod metrics;
pub mod pipeline;
pub mod recorder;
pub mod resilience;
pub mod scheduler;
pub mod structured_logging;
pub mod test_utils;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use config::OracleConfig;
pub use pipeline::{CycleRejected, CycleReport, OraclePipeline, Target};
pub use scheduler::{DailySchedule, Scheduler};
pub use types::{ComputedRate, FeeParameters, IndexSample, SubmissionRecord, SubmissionStatus, Trigger};
