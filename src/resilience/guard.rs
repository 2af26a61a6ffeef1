//! Retry loop wrapped around a circuit breaker

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::retry::RetryPolicy;
use super::Retryable;
use crate::metrics::metrics;
use crate::types::{CycleError, FailureKind};
use scopeguard::ScopeGuard;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a guarded operation gave up
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// Circuit is open; nothing was attempted in this call after `attempts`
    #[error("circuit open for {operation} (retry in {retry_in:?}, attempts: {attempts})")]
    CircuitOpen {
        operation: &'static str,
        attempts: u32,
        retry_in: Duration,
    },

    /// Non-retryable failure; surfaced immediately
    #[error("{operation} failed permanently on attempt {attempts}: {error}")]
    Permanent {
        operation: &'static str,
        attempts: u32,
        error: E,
    },

    /// Every allowed attempt failed
    #[error("{operation} exhausted {attempts} attempts, last error: {error}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        error: E,
    },

    /// Shutdown requested mid-operation
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Cancelled { operation: &'static str, attempts: u32 },
}

impl<E> GuardError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::CircuitOpen { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CircuitOpen { .. } => FailureKind::Transient,
            Self::Permanent { .. } => FailureKind::Structural,
            Self::Exhausted { .. } => FailureKind::Exhaustion,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// The underlying operation error, if one ended the loop
    pub fn source_error(&self) -> Option<&E> {
        match self {
            Self::Permanent { error, .. } | Self::Exhausted { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<E: std::fmt::Display> GuardError<E> {
    pub fn to_cycle_error(&self) -> CycleError {
        CycleError::new(self.kind(), self.to_string())
    }
}

/// Retry policy plus circuit breaker for one operation class
#[derive(Debug)]
pub struct ResilienceGuard {
    operation: &'static str,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ResilienceGuard {
    pub fn new(operation: &'static str, policy: RetryPolicy) -> Self {
        let breaker = CircuitBreaker::new(operation, policy.failure_threshold, policy.cooldown());
        Self {
            operation,
            policy,
            breaker,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn circuit(&self) -> CircuitState {
        self.breaker.snapshot()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `operation` under the retry policy and circuit breaker
    ///
    /// `operation` receives the 1-based attempt number. Non-retryable errors
    /// end the loop at once; retryable ones back off and try again until
    /// `max_attempts` is reached or the circuit opens.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let op = self.operation;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if let Err(retry_in) = self.breaker.try_acquire() {
                metrics().circuit_rejections.inc();
                warn!(
                    operation = op,
                    retry_in_secs = retry_in.as_secs(),
                    "Circuit open, rejecting call"
                );
                return Err(GuardError::CircuitOpen {
                    operation: op,
                    attempts: attempt,
                    retry_in,
                });
            }

            attempt += 1;
            if attempt > 1 {
                debug!(operation = op, attempt, max_attempts, "Retrying operation");
            }

            // Hands a half-open probe slot back if this future is cancelled or dropped mid-attempt
            let admitted = scopeguard::guard(&self.breaker, |breaker| breaker.record_neutral());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(GuardError::Cancelled { operation: op, attempts: attempt });
                }
                result = operation(attempt) => result,
            };
            ScopeGuard::into_inner(admitted);

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    if attempt > 1 {
                        debug!(operation = op, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.breaker.record_neutral();
                warn!(operation = op, attempt, error = %err, "Permanent error, not retrying");
                return Err(GuardError::Permanent {
                    operation: op,
                    attempts: attempt,
                    error: err,
                });
            }

            self.breaker.record_failure();

            if attempt >= max_attempts {
                warn!(operation = op, attempts = attempt, error = %err, "All retry attempts exhausted");
                return Err(GuardError::Exhausted {
                    operation: op,
                    attempts: attempt,
                    error: err,
                });
            }

            let backoff = self.policy.delay_for_attempt(attempt);
            debug!(
                operation = op,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Transient error, backing off before retry"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(GuardError::Cancelled { operation: op, attempts: attempt });
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("broken")]
        Broken,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn policy(max_attempts: u32, failure_threshold: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 250,
            failure_threshold,
            cooldown_secs: 60,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let guard = ResilienceGuard::new("test", policy(5, 10));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = guard
            .execute(&cancel, |attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.circuit().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_attempts() {
        let guard = ResilienceGuard::new("test", policy(4, 100));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = guard
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            })
            .await;

        assert!(matches!(result, Err(GuardError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 250 (capped)
        assert_eq!(started.elapsed(), Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let guard = ResilienceGuard::new("test", policy(5, 10));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = guard
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Broken) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Structural);
        assert_eq!(err.source_error(), Some(&TestError::Broken));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.circuit().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_mid_loop_and_rejects() {
        let guard = ResilienceGuard::new("test", policy(5, 2));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = guard
            .execute(&cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Flaky) }
            })
            .await;

        assert!(matches!(result, Err(GuardError::CircuitOpen { attempts: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Subsequent call is rejected without invoking the operation
        let result: Result<(), GuardError<TestError>> =
            guard.execute(&cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(GuardError::CircuitOpen { attempts: 0, .. })));

        // After the cooldown one probe goes through and closes the circuit
        tokio::time::advance(Duration::from_secs(60)).await;
        let result: Result<u32, GuardError<TestError>> =
            guard.execute(&cancel, |attempt| async move { Ok(attempt) }).await;
        assert_eq!(result.unwrap(), 1);
        assert!(!guard.circuit().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let guard = ResilienceGuard::new("test", policy(5, 10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result: Result<(), _> = guard
            .execute(&cancel, |_| {
                trigger.cancel();
                async { Err(TestError::Flaky) }
            })
            .await;

        assert!(matches!(result, Err(GuardError::Cancelled { attempts: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_half_open_attempt_frees_probe_slot() {
        let guard = ResilienceGuard::new("test", policy(1, 1));
        let cancel = CancellationToken::new();

        let result: Result<(), _> = guard.execute(&cancel, |_| async { Err(TestError::Flaky) }).await;
        assert!(matches!(result, Err(GuardError::Exhausted { attempts: 1, .. })));
        assert!(guard.circuit().is_open());

        tokio::time::advance(Duration::from_secs(60)).await;

        // The half-open attempt never finishes; the caller gives up on it
        let stalled = tokio::time::timeout(
            Duration::from_secs(5),
            guard.execute(&cancel, |_| std::future::pending::<Result<(), TestError>>()),
        )
        .await;
        assert!(stalled.is_err());
        assert!(!guard.circuit().probe_in_flight);

        let result: Result<u32, GuardError<TestError>> =
            guard.execute(&cancel, |attempt| async move { Ok(attempt) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(guard.circuit().phase, crate::resilience::BreakerPhase::Closed);
    }
}
