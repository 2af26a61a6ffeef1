//! Retry policy with capped exponential backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and circuit-breaker policy for one guarded operation class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    pub base_delay_ms: u64,

    /// Growth factor applied per further failed attempt
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Consecutive failed attempts that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe is allowed, in seconds
    pub cooldown_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            failure_threshold: 5,
            cooldown_secs: 300,
        }
    }
}

impl RetryPolicy {
    /// Fetch defaults: three attempts a minute apart
    pub fn fetch_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 60_000,
            failure_threshold: 6,
            cooldown_secs: 900,
        }
    }

    /// Submission defaults: three attempts, 30s growing to 2min
    pub fn submit_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 120_000,
            failure_threshold: 6,
            cooldown_secs: 900,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    ///
    /// `min(base * multiplier^(attempt-1), max)`; non-decreasing in `attempt`
    /// as long as `multiplier >= 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Check the policy is usable
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("{name}: max_attempts must be > 0");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            anyhow::bail!("{name}: backoff_multiplier must be >= 1.0");
        }
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!("{name}: max_delay_ms must be >= base_delay_ms");
        }
        if self.failure_threshold == 0 {
            anyhow::bail!("{name}: failure_threshold must be > 0");
        }
        Ok(())
    }
}
