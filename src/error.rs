//! Error taxonomy shared by every balancer subsystem.

use thiserror::Error;

/// Errors returned to the immediate caller of a balancer operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// Selection found no eligible instance.
    #[error("no healthy instance available")]
    NoHealthyInstance,

    /// The instance's circuit breaker rejected the call without invoking it.
    #[error("circuit breaker for {instance} is open")]
    CircuitOpen { instance: String },

    /// An instance with this name is already registered.
    #[error("instance {0} is already registered")]
    DuplicateInstance(String),

    /// No instance with this name is registered.
    #[error("instance {0} not found")]
    NotFound(String),

    /// Rejected at construction time (weights, thresholds, addresses).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The upstream call completed with a failure.
    #[error("upstream {instance} failed: {message}")]
    Upstream { instance: String, message: String },

    /// The upstream call did not complete within the request timeout.
    #[error("upstream {instance} timed out after {millis}ms")]
    Timeout { instance: String, millis: u64 },
}

impl BalancerError {
    /// True for failures of the instance itself, as opposed to routing decisions.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Timeout { .. })
    }
}

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;
