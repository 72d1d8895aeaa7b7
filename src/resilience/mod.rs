//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an instance:
//!     → circuit_breaker.rs (admit or reject, track consecutive failures)
//!     → On failure or no eligible instance: backoff.rs (wait, then re-select)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures
//! - Open circuits are never retried against the same instance immediately
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::RetryPolicy;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
