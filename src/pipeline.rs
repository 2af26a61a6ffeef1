//! One update cycle: fetch, extract, compute, submit, record
//!
//! [`OraclePipeline`] owns the fetch guard and the chain submitter, so both
//! circuit breakers live exactly as long as the pipeline. A cycle lock keeps
//! cycles strictly sequential.

use crate::chain::ChainSubmitter;
use crate::extractor;
use crate::fee::{self, FeeError};
use crate::fetcher::{FetchError, IndexSource};
use crate::metrics::{metrics, Timer};
use crate::recorder::{CycleRecord, Recorder};
use crate::resilience::{ResilienceGuard, RetryPolicy};
use crate::scheduler::CycleRunner;
use crate::structured_logging::CycleContext;
use crate::types::{
    ComputedRate, CycleError, FailureKind, FeeParameters, IndexSample, SubmissionRecord, Trigger,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Why a cycle was not started
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CycleRejected {
    #[error("an update cycle is already in progress")]
    InProgress,
}

/// Where and how to read the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub selector: String,
}

/// Everything that happened in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_id: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sample: Option<IndexSample>,
    pub rate: Option<ComputedRate>,
    pub explanation: Option<String>,
    /// `None` when the cycle failed before submission or the chain is disabled
    pub submission: Option<SubmissionRecord>,
    pub success: bool,
    pub error: Option<CycleError>,
}

impl CycleReport {
    pub fn new(cycle_id: impl Into<String>, trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            cycle_id: cycle_id.into(),
            trigger,
            started_at: now,
            finished_at: now,
            sample: None,
            rate: None,
            explanation: None,
            submission: None,
            success: false,
            error: None,
        }
    }

    fn fail(mut self, error: CycleError) -> Self {
        self.success = false;
        self.error = Some(error);
        self
    }
}

pub struct OraclePipeline {
    source: Arc<dyn IndexSource>,
    fetch_guard: ResilienceGuard,
    /// `None` runs in dry-run mode
    submitter: Option<ChainSubmitter>,
    target: Target,
    fee: FeeParameters,
    recorders: Vec<Arc<dyn Recorder>>,
    cycle_lock: Mutex<()>,
}

impl OraclePipeline {
    pub fn new(
        source: Arc<dyn IndexSource>,
        fetch_policy: RetryPolicy,
        submitter: Option<ChainSubmitter>,
        target: Target,
        fee: FeeParameters,
    ) -> Self {
        Self {
            source,
            fetch_guard: ResilienceGuard::new("fetch", fetch_policy),
            submitter,
            target,
            fee,
            recorders: Vec::new(),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorders.push(recorder);
        self
    }

    pub fn fetch_guard(&self) -> &ResilienceGuard {
        &self.fetch_guard
    }

    pub fn submitter(&self) -> Option<&ChainSubmitter> {
        self.submitter.as_ref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.submitter.is_none()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn fee_parameters(&self) -> &FeeParameters {
        &self.fee
    }

    /// Run one cycle
    ///
    /// Scheduled cycles wait for a running cycle to finish; manual cycles are
    /// rejected instead so an operator never queues a duplicate submission.
    pub async fn run_cycle(
        &self,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleRejected> {
        let _cycle = match trigger {
            Trigger::Scheduled => self.cycle_lock.lock().await,
            Trigger::Manual => match self.cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    metrics().cycles_rejected.inc();
                    tracing::warn!("Manual cycle rejected, another cycle is running");
                    return Err(CycleRejected::InProgress);
                }
            },
        };

        let ctx = CycleContext::new(trigger);
        let report = self.execute(&ctx, cancel).await;
        self.record(&report).await;
        Ok(report)
    }

    async fn execute(&self, ctx: &CycleContext, cancel: &CancellationToken) -> CycleReport {
        let m = metrics();
        m.cycles_total.inc();
        m.cycle_in_flight.inc();
        let _in_flight = scopeguard::guard((), |_| m.cycle_in_flight.dec());
        let timer = Timer::new();

        ctx.logger.log_cycle_started(ctx.trigger);
        let mut report = CycleReport::new(ctx.cycle_id.clone(), ctx.trigger);
        report.started_at = ctx.started_at;

        let mut report = self.run_stages(ctx, report, cancel).await;
        report.finished_at = Utc::now();

        if report.success {
            m.cycles_succeeded.inc();
        } else {
            m.cycles_failed.inc();
            if let Some(error) = &report.error {
                ctx.logger.error(&error.to_string());
            }
        }
        timer.observe_duration(&m.cycle_latency);
        ctx.logger
            .log_cycle_finished(report.success, (timer.elapsed_secs() * 1000.0) as u64);
        report
    }

    async fn run_stages(
        &self,
        ctx: &CycleContext,
        mut report: CycleReport,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let sample = match self.fetch_sample(ctx, cancel).await {
            Ok(sample) => sample,
            Err(error) => return report.fail(error),
        };
        ctx.logger.log_sample(&sample);
        metrics().last_index_value.set(sample.raw_value);
        report.sample = Some(sample.clone());

        let rate = match fee::compute_rate(sample, &self.fee) {
            Ok(rate) => rate,
            Err(e) => return report.fail(fee_failure(&e)),
        };
        let explanation = fee::describe_rate(rate.sample.raw_value, self.fee.baseline, rate.rate_bps);
        ctx.logger.log_rate(&rate, &explanation);
        metrics().last_rate_bps.set(i64::from(rate.rate_bps));
        report.rate = Some(rate.clone());
        report.explanation = Some(explanation);

        let Some(submitter) = &self.submitter else {
            tracing::info!(cycle_id = %ctx.cycle_id, rate_bps = rate.rate_bps, "Chain disabled, skipping submission");
            report.success = true;
            return report;
        };

        let record = submitter.submit(&rate, &ctx.logger, cancel).await;
        report.success = record.is_confirmed();
        report.error = record.error.clone();
        report.submission = Some(record);
        report
    }

    async fn fetch_sample(
        &self,
        ctx: &CycleContext,
        cancel: &CancellationToken,
    ) -> Result<IndexSample, CycleError> {
        let timer = Timer::new();
        let source = &self.source;
        let target = &self.target;
        let logger = &ctx.logger;

        let fetched = self
            .fetch_guard
            .execute(cancel, move |attempt| {
                logger.log_fetch_attempt(attempt, &target.url);
                source.fetch(&target.url, &target.selector)
            })
            .await;
        timer.observe_duration(&metrics().fetch_latency);

        let raw = fetched.map_err(|e| {
            if let Some(FetchError::SelectorNotFound { .. }) = e.source_error() {
                ctx.logger.warn("Index element missing, upstream markup may have changed");
            }
            e.to_cycle_error()
        })?;

        extractor::extract(&raw, &target.selector)
            .map_err(|e| CycleError::new(FailureKind::Structural, e.to_string()))
    }

    async fn record(&self, report: &CycleReport) {
        if self.recorders.is_empty() {
            return;
        }
        let record = CycleRecord::from_report(report);
        for recorder in &self.recorders {
            if let Err(e) = recorder.record(&record).await {
                tracing::error!(cycle_id = %report.cycle_id, error = %e, "Failed to record cycle");
            }
        }
    }
}

fn fee_failure(error: &FeeError) -> CycleError {
    CycleError::new(FailureKind::Structural, error.to_string())
}

#[async_trait]
impl CycleRunner for OraclePipeline {
    async fn run_cycle(
        &self,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleRejected> {
        OraclePipeline::run_cycle(self, trigger, cancel).await
    }
}
