//! Circuit breaker guarding one operation class (fetch or submit)
//!
//! Counts consecutive failed attempts. Once `failure_threshold` is reached the
//! circuit opens and every call is rejected until the cooldown elapses. The
//! first call after the cooldown becomes the single half-open probe: success
//! closes the circuit, failure re-opens it for another cooldown.
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Circuit breaker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Shared breaker state; only mutated through [`CircuitBreaker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub phase: BreakerPhase,
    pub consecutive_failures: u32,
    pub reopen_at: Option<Instant>,
    pub probe_in_flight: bool,
}

impl CircuitState {
    fn closed() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            consecutive_failures: 0,
            reopen_at: None,
            probe_in_flight: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.phase == BreakerPhase::Open
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    state: Mutex<CircuitState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            state: Mutex::new(CircuitState::closed()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask for permission to run one attempt
    ///
    /// Returns the time left until the circuit may be probed when rejected.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        match state.phase {
            BreakerPhase::Closed => Ok(()),
            BreakerPhase::Open => {
                let now = Instant::now();
                let reopen_at = state.reopen_at.unwrap_or(now);
                if now >= reopen_at {
                    state.phase = BreakerPhase::HalfOpen;
                    state.probe_in_flight = true;
                    debug!(breaker = self.name, "Circuit breaker transitioned to HALF_OPEN");
                    Ok(())
                } else {
                    Err(reopen_at - now)
                }
            }
            BreakerPhase::HalfOpen => {
                if state.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.phase != BreakerPhase::Closed {
            debug!(breaker = self.name, "Circuit breaker transitioned to CLOSED");
        }
        *state = CircuitState::closed();
    }

    /// Record a failed (retryable) attempt
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.probe_in_flight = false;

        let should_open = match state.phase {
            BreakerPhase::HalfOpen => true,
            BreakerPhase::Closed => state.consecutive_failures >= self.failure_threshold,
            BreakerPhase::Open => false,
        };

        if should_open {
            state.phase = BreakerPhase::Open;
            state.reopen_at = Some(Instant::now() + self.cooldown);
            warn!(
                breaker = self.name,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    /// Record an attempt that ended in a non-retryable error
    ///
    /// Such errors say nothing about endpoint health: counters are left alone
    /// and a half-open probe slot is handed back.
    pub fn record_neutral(&self) {
        let mut state = self.state.lock();
        state.probe_in_flight = false;
    }

    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().clone()
    }

    /// Manually reset to closed (admin/testing)
    pub fn force_reset(&self) {
        *self.state.lock() = CircuitState::closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exact_threshold() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(10));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().phase, BreakerPhase::Closed);
        assert!(breaker.try_acquire().is_ok());

        breaker.record_failure();
        let snapshot = breaker.snapshot();
        assert!(snapshot.is_open());
        assert_eq!(snapshot.consecutive_failures, 3);

        let retry_in = breaker.try_acquire().unwrap_err();
        assert_eq!(retry_in, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.snapshot().phase, BreakerPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_probe_closes() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(5));
        breaker.record_failure();
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.snapshot().phase, BreakerPhase::HalfOpen);

        // Only one probe at a time
        assert_eq!(breaker.try_acquire(), Err(Duration::ZERO));

        breaker.record_success();
        assert_eq!(breaker.snapshot().phase, BreakerPhase::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", 2, Duration::from_secs(5));
        breaker.record_failure();
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure();

        let snapshot = breaker.snapshot();
        assert!(snapshot.is_open());
        assert_eq!(breaker.try_acquire(), Err(Duration::from_secs(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_outcome_releases_probe() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(1));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(breaker.try_acquire().is_ok());
        breaker.record_neutral();
        assert_eq!(breaker.snapshot().phase, BreakerPhase::HalfOpen);
        assert!(breaker.try_acquire().is_ok());
    }
}
