//! Common types used throughout the oracle pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One observation of the market index, produced once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSample {
    /// When the value was extracted
    pub timestamp: DateTime<Utc>,

    /// Parsed index value
    pub raw_value: f64,

    /// Text exactly as it appeared in the located element
    pub raw_text: String,

    /// Where the value came from (URL + selector)
    pub source: String,
}

impl IndexSample {
    pub fn new(raw_value: f64, raw_text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            raw_value,
            raw_text: raw_text.into(),
            source: source.into(),
        }
    }
}

/// Fee mapping parameters, loaded once at startup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeParameters {
    /// Index value that maps to the midpoint rate
    pub baseline: f64,

    /// Lower rate bound in basis points
    pub min_rate_bps: u32,

    /// Upper rate bound in basis points
    pub max_rate_bps: u32,
}

impl FeeParameters {
    pub fn new(baseline: f64, min_rate_bps: u32, max_rate_bps: u32) -> Self {
        Self {
            baseline,
            min_rate_bps,
            max_rate_bps,
        }
    }
}

/// A fee rate derived from exactly one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedRate {
    pub sample: IndexSample,
    pub rate_bps: u32,
}

/// Opaque transaction handle returned by the chain capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHandle(String);

impl TxHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a fee submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Pending,
    Broadcast,
    Confirmed,
    Reverted,
    Abandoned,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Reverted | Self::Abandoned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Broadcast => "broadcast",
            Self::Confirmed => "confirmed",
            Self::Reverted => "reverted",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy shared by every stage of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeouts, broadcast races, open circuit
    Transient,
    /// Markup changes, bad numbers, reverts, gas ceiling; never retried
    Structural,
    /// Retries used up without success
    Exhaustion,
    /// Shutdown requested while the cycle was in flight
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Structural => "structural",
            Self::Exhaustion => "exhaustion",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A failure attributed to one cycle, with a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleError {
    pub kind: FailureKind,
    pub reason: String,
}

impl CycleError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// On-chain submission state for one computed rate
///
/// Created at the first attempt and only mutated by the chain submitter.
/// Once `Confirmed`, `Reverted` or `Abandoned` the record no longer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub rate: ComputedRate,
    pub attempt: u32,
    pub tx_handle: Option<TxHandle>,
    pub status: SubmissionStatus,
    pub gas_used: Option<u64>,
    pub block_number: Option<u64>,
    pub error: Option<CycleError>,
}

impl SubmissionRecord {
    pub fn new(rate: ComputedRate) -> Self {
        Self {
            rate,
            attempt: 0,
            tx_handle: None,
            status: SubmissionStatus::Pending,
            gas_used: None,
            block_number: None,
            error: None,
        }
    }

    /// Start a fresh attempt; a previous broadcast is superseded
    pub fn begin_attempt(&mut self, attempt: u32) {
        if self.status.is_terminal() {
            return;
        }
        self.attempt = attempt;
        self.status = SubmissionStatus::Pending;
        self.tx_handle = None;
    }

    pub fn mark_broadcast(&mut self, tx: TxHandle) {
        if self.status.is_terminal() {
            return;
        }
        self.tx_handle = Some(tx);
        self.status = SubmissionStatus::Broadcast;
    }

    pub fn confirm(&mut self, gas_used: Option<u64>, block_number: Option<u64>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubmissionStatus::Confirmed;
        self.gas_used = gas_used;
        self.block_number = block_number;
    }

    pub fn revert(&mut self, gas_used: Option<u64>, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubmissionStatus::Reverted;
        self.gas_used = gas_used;
        self.error = Some(CycleError::new(FailureKind::Structural, reason));
    }

    pub fn abandon(&mut self, error: CycleError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = SubmissionStatus::Abandoned;
        self.error = Some(error);
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SubmissionStatus::Confirmed
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Daily schedule fired
    Scheduled,
    /// One-shot or on-demand invocation
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => f.write_str("scheduled"),
            Self::Manual => f.write_str("manual"),
        }
    }
}
