//! Index-to-fee mapping
//!
//! Inverse linear correlation between the market index and the fee rate,
//! anchored on three points relative to the baseline `b`:
//!
//! | index  | rate                 |
//! |--------|----------------------|
//! | `2b`   | `min_rate_bps`       |
//! | `b`    | midpoint of the range|
//! | `b/3`  | `max_rate_bps`       |
//!
//! The mapping is linear between neighbouring anchors and clamped outside
//! them, so it is continuous and non-increasing in the index.
//!
//! The anchors are fixed by the reference points an operator checks against:
//! 3000 gives 10 bp, 1500 gives 55 bp and 500 gives 100 bp for a 1500 baseline
//! and a 10-100 bp range.

use crate::types::{ComputedRate, FeeParameters, IndexSample};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FeeError {
    /// Index is zero, negative, NaN or infinite
    #[error("Invalid index value: {value}")]
    InvalidIndex { value: f64 },

    #[error("Invalid fee parameters: {reason}")]
    InvalidParameters { reason: String },
}

impl FeeParameters {
    pub fn validate(&self) -> Result<(), FeeError> {
        if !self.baseline.is_finite() || self.baseline <= 0.0 {
            return Err(FeeError::InvalidParameters {
                reason: format!("baseline must be positive and finite, got {}", self.baseline),
            });
        }
        if self.min_rate_bps > self.max_rate_bps {
            return Err(FeeError::InvalidParameters {
                reason: format!(
                    "min_rate_bps ({}) exceeds max_rate_bps ({})",
                    self.min_rate_bps, self.max_rate_bps
                ),
            });
        }
        Ok(())
    }
}

/// Position of `index` on the rate scale, in `[0, 2]`
///
/// 0 is the cheapest end, 1 the baseline, 2 the most expensive end.
fn correlation_ratio(index: f64, baseline: f64) -> f64 {
    if index >= baseline {
        ((2.0 * baseline - index) / baseline).clamp(0.0, 1.0)
    } else {
        let span = baseline - baseline / 3.0;
        (1.0 + (baseline - index) / span).clamp(1.0, 2.0)
    }
}

/// Rate in basis points for `index`, without building a [`ComputedRate`]
pub fn rate_for_index(index: f64, params: &FeeParameters) -> Result<u32, FeeError> {
    params.validate()?;
    if !index.is_finite() || index <= 0.0 {
        return Err(FeeError::InvalidIndex { value: index });
    }

    let min = f64::from(params.min_rate_bps);
    let max = f64::from(params.max_rate_bps);
    let ratio = correlation_ratio(index, params.baseline);

    let rate = (min + (max - min) * ratio / 2.0).round();
    let rate = rate.clamp(min, max) as u32;
    Ok(rate.clamp(params.min_rate_bps, params.max_rate_bps))
}

/// Compute the fee rate for one sample
pub fn compute_rate(sample: IndexSample, params: &FeeParameters) -> Result<ComputedRate, FeeError> {
    let rate_bps = rate_for_index(sample.raw_value, params)?;
    Ok(ComputedRate { sample, rate_bps })
}

/// Coarse market condition relative to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketBand {
    /// At or above 1.5x baseline
    VeryHigh,
    /// At or above baseline
    High,
    /// Between half the baseline and the baseline
    Low,
    /// At or below half the baseline
    VeryLow,
}

impl MarketBand {
    pub fn classify(index: f64, baseline: f64) -> Self {
        if index >= baseline {
            if index >= baseline * 1.5 {
                Self::VeryHigh
            } else {
                Self::High
            }
        } else if index <= baseline * 0.5 {
            Self::VeryLow
        } else {
            Self::Low
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Self::VeryHigh => "index very high, market strong, minimum fee",
            Self::High => "index high, market good, low fee",
            Self::Low => "index low, market weak, high fee",
            Self::VeryLow => "index very low, market stressed, maximum fee",
        }
    }
}

impl fmt::Display for MarketBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())
    }
}

/// Human-readable explanation of a computed rate
pub fn describe_rate(index: f64, baseline: f64, rate_bps: u32) -> String {
    let band = MarketBand::classify(index, baseline);
    format!(
        "{} | index {} | fee {:.2}% ({} bp)",
        band,
        index,
        f64::from(rate_bps) / 100.0,
        rate_bps
    )
}
