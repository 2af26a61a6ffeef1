//! Per-cycle outcome records
//!
//! The pipeline hands every finished cycle to each configured [`Recorder`].
//! Sinks only persist or display; they never influence the cycle result.

pub mod jsonl;
pub mod tracing_recorder;

pub use jsonl::JsonLinesRecorder;
pub use tracing_recorder::TracingRecorder;

use crate::pipeline::CycleReport;
use crate::types::{CycleError, Trigger, TxHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Submission status reported when the chain is disabled
pub const STATUS_DISABLED: &str = "disabled";
/// Submission status reported when the cycle failed before a rate existed
pub const STATUS_NOT_SUBMITTED: &str = "not_submitted";

/// Flat, serialisable view of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub cycle_id: String,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
    pub raw_value: Option<f64>,
    pub raw_text: Option<String>,
    pub source: Option<String>,
    pub computed_rate_bps: Option<u32>,
    pub explanation: Option<String>,
    pub submission_status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tx_handle: Option<TxHandle>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gas_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub block_number: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<CycleError>,
}

impl CycleRecord {
    pub fn from_report(report: &CycleReport) -> Self {
        let submission = report.submission.as_ref();
        let submission_status = match submission {
            Some(s) => s.status.as_str().to_string(),
            None if report.rate.is_some() => STATUS_DISABLED.to_string(),
            None => STATUS_NOT_SUBMITTED.to_string(),
        };

        Self {
            cycle_id: report.cycle_id.clone(),
            trigger: report.trigger,
            timestamp: report.finished_at,
            raw_value: report.sample.as_ref().map(|s| s.raw_value),
            raw_text: report.sample.as_ref().map(|s| s.raw_text.clone()),
            source: report.sample.as_ref().map(|s| s.source.clone()),
            computed_rate_bps: report.rate.as_ref().map(|r| r.rate_bps),
            explanation: report.explanation.clone(),
            submission_status,
            tx_handle: submission.and_then(|s| s.tx_handle.clone()),
            attempts: submission.map_or(0, |s| s.attempt),
            gas_used: submission.and_then(|s| s.gas_used),
            block_number: submission.and_then(|s| s.block_number),
            success: report.success,
            error: report.error.clone(),
        }
    }
}

/// Sink for finished cycles
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, record: &CycleRecord) -> anyhow::Result<()>;
}
