//! Records as structured log lines

use super::{CycleRecord, Recorder};
use async_trait::async_trait;

/// Emits each record on the `fee_oracle::record` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

#[async_trait]
impl Recorder for TracingRecorder {
    async fn record(&self, record: &CycleRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record)?;
        if record.success {
            tracing::info!(
                target: "fee_oracle::record",
                cycle_id = %record.cycle_id,
                status = %record.submission_status,
                rate_bps = ?record.computed_rate_bps,
                record = %json,
                "Cycle recorded"
            );
        } else {
            tracing::warn!(
                target: "fee_oracle::record",
                cycle_id = %record.cycle_id,
                status = %record.submission_status,
                error = ?record.error.as_ref().map(|e| e.to_string()),
                record = %json,
                "Failed cycle recorded"
            );
        }
        Ok(())
    }
}
