//! End-to-end cycle tests
//!
//! Drive [`OraclePipeline`] with scripted sources and contracts under paused
//! tokio time, covering:
//! - the index to fee mapping through to the submitted transaction
//! - transient broadcast failures retried with a fresh nonce
//! - on-chain reverts, gas ceilings and structural fetch failures
//! - circuit breaker state carried across cycles
//! - dry-run recording

use crate::chain::{ChainSubmitter, SubmitSettings};
use crate::fetcher::FetchError;
use crate::pipeline::{OraclePipeline, Target};
use crate::recorder::{STATUS_DISABLED, STATUS_NOT_SUBMITTED};
use crate::resilience::{BreakerPhase, RetryPolicy};
use crate::test_utils::{index_page, MemoryRecorder, ScriptedContract, ScriptedSource, SendOutcome};
use crate::types::{FailureKind, FeeParameters, SubmissionStatus, Trigger};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn policy(max_attempts: u32, failure_threshold: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1_000,
        backoff_multiplier: 2.0,
        max_delay_ms: 8_000,
        failure_threshold,
        cooldown_secs: 300,
    }
}

fn target() -> Target {
    Target {
        url: "https://index.example/daily".to_string(),
        selector: "#price-value".to_string(),
    }
}

fn fee() -> FeeParameters {
    FeeParameters::new(1500.0, 10, 100)
}

struct Harness {
    pipeline: OraclePipeline,
    source: Arc<ScriptedSource>,
    contract: Arc<ScriptedContract>,
    records: Arc<MemoryRecorder>,
}

fn harness(source: ScriptedSource, contract: ScriptedContract, submit_policy: RetryPolicy) -> Harness {
    let source = Arc::new(source);
    let contract = Arc::new(contract);
    let records = Arc::new(MemoryRecorder::new());
    let submitter = ChainSubmitter::new(contract.clone(), submit_policy, SubmitSettings::default());
    let pipeline = OraclePipeline::new(source.clone(), policy(3, 10), Some(submitter), target(), fee())
        .with_recorder(records.clone());

    Harness {
        pipeline,
        source,
        contract,
        records,
    }
}

#[tokio::test(start_paused = true)]
async fn test_index_values_map_to_submitted_rates() {
    let source = ScriptedSource::scripted(vec![
        Ok(index_page("3,000")),
        Ok(index_page("1,500")),
        Ok(index_page("500")),
    ]);
    let h = harness(source, ScriptedContract::new(), policy(3, 10));
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let report = h.pipeline.run_cycle(Trigger::Scheduled, &cancel).await.unwrap();
        assert!(report.success, "cycle failed: {:?}", report.error);
    }

    assert_eq!(h.contract.sent_rates(), vec![10, 55, 100]);
    assert_eq!(h.contract.nonces_used(), vec![0, 1, 2]);

    let records = h.records.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].raw_value, Some(3000.0));
    assert_eq!(records[0].raw_text.as_deref(), Some("3,000"));
    assert_eq!(records[0].submission_status, "confirmed");
    assert_eq!(records[0].attempts, 1);
    assert_eq!(records[0].gas_used, Some(29_500));
    assert!(records[0].tx_handle.is_some());
    assert!(records[1].explanation.as_deref().unwrap().contains("(55 bp)"));
    assert!(records.iter().all(|r| r.success && r.error.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_failures_retried_until_confirmed() {
    let contract = ScriptedContract::new().with_sends(vec![
        SendOutcome::BroadcastError("nonce too low".into()),
        SendOutcome::BroadcastError("replacement transaction underpriced".into()),
        SendOutcome::BroadcastError("connection reset".into()),
        SendOutcome::Confirm,
    ]);
    let h = harness(ScriptedSource::serving("1,500"), contract, policy(5, 5));

    let report = h
        .pipeline
        .run_cycle(Trigger::Manual, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success);
    let submission = report.submission.unwrap();
    assert_eq!(submission.status, SubmissionStatus::Confirmed);
    assert_eq!(submission.attempt, 4);
    assert_eq!(submission.rate.rate_bps, 55);
    // nonce re-read before every attempt
    assert_eq!(h.contract.nonce_queries(), 4);
    assert_eq!(h.contract.nonces_used(), vec![0]);
    assert_eq!(h.pipeline.submitter().unwrap().guard().circuit().phase, BreakerPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_revert_is_recorded_without_retry() {
    let contract = ScriptedContract::new().with_sends(vec![SendOutcome::Revert]);
    let h = harness(ScriptedSource::serving("2,250"), contract, policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(h.contract.sent_rates().len(), 1);

    let submission = report.submission.as_ref().unwrap();
    assert_eq!(submission.status, SubmissionStatus::Reverted);
    assert_eq!(submission.gas_used, Some(23_100));
    assert_eq!(report.error.as_ref().unwrap().kind, FailureKind::Structural);

    let records = h.records.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].submission_status, "reverted");
    assert!(records[0].error.as_ref().unwrap().reason.contains("reverted"));
}

#[tokio::test(start_paused = true)]
async fn test_gas_ceiling_abandons_before_broadcast() {
    let contract = ScriptedContract::new().with_gas_price(80_000_000_000);
    let h = harness(ScriptedSource::serving("1,500"), contract, policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert!(h.contract.sent_rates().is_empty());
    let submission = report.submission.unwrap();
    assert_eq!(submission.status, SubmissionStatus::Abandoned);
    assert_eq!(submission.attempt, 1);
    assert_eq!(submission.error.unwrap().kind, FailureKind::Structural);
}

#[tokio::test(start_paused = true)]
async fn test_missing_selector_fails_without_retry() {
    let source = ScriptedSource::scripted(vec![Err(FetchError::SelectorNotFound {
        url: target().url,
        selector: target().selector,
    })]);
    let h = harness(source, ScriptedContract::new(), policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(h.source.calls(), 1);
    assert_eq!(report.error.as_ref().unwrap().kind, FailureKind::Structural);
    assert!(report.sample.is_none());
    assert!(report.submission.is_none());
    assert!(h.contract.sent_rates().is_empty());

    let records = h.records.records();
    assert_eq!(records[0].submission_status, STATUS_NOT_SUBMITTED);
    assert_eq!(records[0].computed_rate_bps, None);
}

#[tokio::test(start_paused = true)]
async fn test_page_without_element_is_structural() {
    let source = ScriptedSource::scripted(vec![Ok("<html><body><p>maintenance</p></body></html>".into())]);
    let h = harness(source, ScriptedContract::new(), policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.source.calls(), 1);
    assert_eq!(report.error.unwrap().kind, FailureKind::Structural);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_value_is_structural() {
    let h = harness(ScriptedSource::serving("n/a"), ScriptedContract::new(), policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(h.source.calls(), 1);
    let error = report.error.unwrap();
    assert_eq!(error.kind, FailureKind::Structural);
    assert!(error.reason.contains("n/a"));
    assert!(report.rate.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zero_index_is_rejected_before_submission() {
    let h = harness(ScriptedSource::serving("0"), ScriptedContract::new(), policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report.sample.is_some());
    assert!(report.rate.is_none());
    assert!(h.contract.sent_rates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_timeouts_exhaust_fetch_retries() {
    let h = harness(ScriptedSource::scripted(Vec::new()), ScriptedContract::new(), policy(3, 10));

    let report = h
        .pipeline
        .run_cycle(Trigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(h.source.calls(), 3);
    assert_eq!(report.error.unwrap().kind, FailureKind::Exhaustion);
    assert_eq!(h.records.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_carries_across_cycles() {
    let timeout = || {
        Err(FetchError::Timeout {
            url: target().url,
            timeout_ms: 30_000,
        })
    };
    let source = Arc::new(ScriptedSource::scripted(vec![timeout(), timeout(), Ok(index_page("1,500"))]));
    let records = Arc::new(MemoryRecorder::new());
    let pipeline = OraclePipeline::new(source.clone(), policy(2, 2), None, target(), fee())
        .with_recorder(records.clone());
    let cancel = CancellationToken::new();

    let first = pipeline.run_cycle(Trigger::Scheduled, &cancel).await.unwrap();
    assert_eq!(first.error.unwrap().kind, FailureKind::Exhaustion);
    assert!(pipeline.fetch_guard().circuit().is_open());

    let second = pipeline.run_cycle(Trigger::Scheduled, &cancel).await.unwrap();
    assert!(!second.success);
    assert_eq!(second.error.unwrap().kind, FailureKind::Transient);
    assert_eq!(source.calls(), 2, "open circuit must not reach the source");

    tokio::time::advance(Duration::from_secs(301)).await;

    let third = pipeline.run_cycle(Trigger::Scheduled, &cancel).await.unwrap();
    assert!(third.success);
    assert_eq!(source.calls(), 3);
    assert_eq!(pipeline.fetch_guard().circuit().phase, BreakerPhase::Closed);
    assert_eq!(records.records().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_records_disabled_status() {
    let source = Arc::new(ScriptedSource::serving("1,500"));
    let records = Arc::new(MemoryRecorder::new());
    let pipeline = OraclePipeline::new(source, policy(3, 10), None, target(), fee())
        .with_recorder(records.clone());
    assert!(pipeline.is_dry_run());

    let report = pipeline
        .run_cycle(Trigger::Manual, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.rate.unwrap().rate_bps, 55);
    assert!(report.submission.is_none());

    let records = records.records();
    assert_eq!(records[0].submission_status, STATUS_DISABLED);
    assert_eq!(records[0].trigger, Trigger::Manual);
    assert_eq!(records[0].attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_confirmation_abandons_submission() {
    let contract = ScriptedContract::new().with_sends(vec![SendOutcome::NeverIncluded]);
    let h = Arc::new(harness(ScriptedSource::serving("1,500"), contract, policy(3, 10)));
    let cancel = CancellationToken::new();

    let task = {
        let h = h.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { h.pipeline.run_cycle(Trigger::Scheduled, &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    cancel.cancel();

    let report = task.await.unwrap().unwrap();
    assert!(!report.success);
    let submission = report.submission.unwrap();
    assert_eq!(submission.status, SubmissionStatus::Abandoned);
    assert!(submission.tx_handle.is_some());
    assert_eq!(submission.error.unwrap().kind, FailureKind::Cancelled);
    assert_eq!(h.records.records().len(), 1);
}
