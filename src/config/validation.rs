//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (failover pairs reference declared instances)
//! - Validate value ranges (weights, thresholds and intervals > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Section checks are shared with component constructors, so a component
//!   built directly from code is held to the same rules as a loaded file

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{
    AnalyticsConfig, BalancerConfig, CircuitBreakerConfig, FailoverConfig, HealthCheckConfig,
    RetryConfig,
};
use crate::error::{BalancerError, BalancerResult};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a complete configuration.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for (i, instance) in config.instances.iter().enumerate() {
        if instance.name.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("instances[{}].name", i),
                "must not be empty",
            ));
        }
        if !names.insert(instance.name.as_str()) {
            errors.push(ValidationError::new(
                format!("instances[{}].name", i),
                format!("duplicate instance name {}", instance.name),
            ));
        }
        if instance.weight == 0 {
            errors.push(ValidationError::new(
                format!("instances[{}].weight", i),
                "must be positive",
            ));
        }
        if let Err(e) = url::Url::parse(&instance.address) {
            errors.push(ValidationError::new(
                format!("instances[{}].address", i),
                format!("invalid address {}: {}", instance.address, e),
            ));
        }
    }

    for (i, pair) in config.failover.pairs.iter().enumerate() {
        for (role, name) in [("primary", &pair.primary), ("backup", &pair.backup)] {
            if !names.contains(name.as_str()) {
                errors.push(ValidationError::new(
                    format!("failover.pairs[{}].{}", i, role),
                    format!("unknown instance {}", name),
                ));
            }
        }
        if pair.primary == pair.backup {
            errors.push(ValidationError::new(
                format!("failover.pairs[{}]", i),
                "primary and backup must differ",
            ));
        }
    }

    errors.extend(circuit_breaker_errors(&config.circuit_breaker));
    errors.extend(health_check_errors(&config.health_check));
    errors.extend(failover_errors(&config.failover));
    errors.extend(analytics_errors(&config.analytics));
    errors.extend(retry_errors(&config.retries));

    if config.request.timeout_ms == 0 {
        errors.push(ValidationError::new("request.timeout_ms", "must be positive"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub(crate) fn circuit_breaker_errors(config: &CircuitBreakerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be positive",
        ));
    }
    if config.half_open_limit == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_limit",
            "must be positive",
        ));
    }
    errors
}

pub(crate) fn health_check_errors(config: &HealthCheckConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be positive"));
    }
    if config.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be positive"));
    }
    if config.unhealthy_threshold == 0 {
        errors.push(ValidationError::new(
            "health_check.unhealthy_threshold",
            "must be positive",
        ));
    }
    if config.recovery_threshold == 0 {
        errors.push(ValidationError::new(
            "health_check.recovery_threshold",
            "must be positive",
        ));
    }
    errors
}

pub(crate) fn failover_errors(config: &FailoverConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.failback_threshold == 0 {
        errors.push(ValidationError::new(
            "failover.failback_threshold",
            "must be positive",
        ));
    }
    errors
}

pub(crate) fn analytics_errors(config: &AnalyticsConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.history_capacity == 0 {
        errors.push(ValidationError::new(
            "analytics.history_capacity",
            "must be positive",
        ));
    }
    if config.response_window == 0 {
        errors.push(ValidationError::new(
            "analytics.response_window",
            "must be positive",
        ));
    }
    errors
}

pub(crate) fn retry_errors(config: &RetryConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if config.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be positive"));
    }
    if config.base_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }
    errors
}

/// Collapse section errors into the construction-time error.
pub(crate) fn ensure_valid(errors: Vec<ValidationError>) -> BalancerResult<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    Err(BalancerError::InvalidConfiguration(joined))
}
