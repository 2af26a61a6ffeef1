//! Structured logging and cycle context

use crate::types::{ComputedRate, IndexSample, SubmissionRecord, Trigger, TxHandle};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Structured logger for cycle events
#[derive(Debug, Clone)]
pub struct CycleLogger {
    cycle_id: String,
}

impl CycleLogger {
    pub fn new(cycle_id: String) -> Self {
        Self { cycle_id }
    }

    pub fn log_cycle_started(&self, trigger: Trigger) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            trigger = %trigger,
            "Update cycle started"
        );
    }

    pub fn log_fetch_attempt(&self, attempt: u32, url: &str) {
        tracing::debug!(
            cycle_id = %self.cycle_id,
            attempt = %attempt,
            url = %url,
            "Fetching index page"
        );
    }

    pub fn log_sample(&self, sample: &IndexSample) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            value = %sample.raw_value,
            raw_text = %sample.raw_text,
            source = %sample.source,
            "Index sample extracted"
        );
    }

    pub fn log_rate(&self, rate: &ComputedRate, explanation: &str) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            rate_bps = %rate.rate_bps,
            explanation = %explanation,
            "Fee rate computed"
        );
    }

    pub fn log_broadcast(&self, attempt: u32, nonce: u64, tx: &TxHandle) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            attempt = %attempt,
            nonce = %nonce,
            tx = %tx,
            "Fee update broadcast"
        );
    }

    pub fn log_submission(&self, record: &SubmissionRecord, latency_ms: u64) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            status = %record.status,
            attempts = %record.attempt,
            tx = ?record.tx_handle.as_ref().map(TxHandle::as_str),
            gas_used = ?record.gas_used,
            block = ?record.block_number,
            latency_ms = %latency_ms,
            "Submission finished"
        );
    }

    pub fn log_cycle_finished(&self, success: bool, latency_ms: u64) {
        tracing::info!(
            cycle_id = %self.cycle_id,
            success = %success,
            latency_ms = %latency_ms,
            "Update cycle finished"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            cycle_id = %self.cycle_id,
            message = %message,
            "Warning"
        );
    }

    pub fn error(&self, message: &str) {
        tracing::error!(
            cycle_id = %self.cycle_id,
            message = %message,
            "Error"
        );
    }
}

/// Per-cycle context: correlation id, trigger and start time
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Unique cycle ID, carried on every log line and the recorded outcome
    pub cycle_id: String,

    pub trigger: Trigger,

    pub started_at: DateTime<Utc>,

    pub logger: CycleLogger,
}

impl CycleContext {
    pub fn new(trigger: Trigger) -> Self {
        let cycle_id = Uuid::new_v4().to_string();
        Self {
            cycle_id: cycle_id.clone(),
            trigger,
            started_at: Utc::now(),
            logger: CycleLogger::new(cycle_id),
        }
    }
}
