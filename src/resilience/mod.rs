//! Retry-with-backoff and circuit-breaker primitives
//!
//! Both network fetch and chain submission run through a [`ResilienceGuard`].
//! Each guard owns one [`CircuitBreaker`]; the breaker state is lock-guarded
//! so a manual cycle and a scheduled cycle never race on it.

pub mod circuit_breaker;
pub mod guard;
pub mod retry;

pub use circuit_breaker::{BreakerPhase, CircuitBreaker, CircuitState};
pub use guard::{GuardError, ResilienceGuard};
pub use retry::RetryPolicy;

/// Classification consumed by the retry loop
pub trait Retryable {
    /// Transient failures are retried; everything else surfaces immediately
    fn is_retryable(&self) -> bool;
}
