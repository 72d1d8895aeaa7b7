//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration for the service balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Instances registered at startup.
    pub instances: Vec<InstanceConfig>,

    /// Instance selection strategy.
    pub strategy: StrategyConfig,

    /// Per-instance circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Primary/backup pairs and failback policy.
    pub failover: FailoverConfig,

    /// Traffic analytics settings.
    pub analytics: AnalyticsConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Request dispatch settings.
    pub request: RequestConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// A service instance declared in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Unique instance name; doubles as its identity.
    pub name: String,

    /// Instance base address (e.g., "http://127.0.0.1:5001").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Weighted,
    LeastConnections,
    Random,
    LeastResponseTime,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "round_robin",
            StrategyKind::Weighted => "weighted",
            StrategyKind::LeastConnections => "least_connections",
            StrategyKind::Random => "random",
            StrategyKind::LeastResponseTime => "least_response_time",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "round_robin" => Ok(StrategyKind::RoundRobin),
            "weighted" | "weighted_round_robin" => Ok(StrategyKind::Weighted),
            "least_connections" => Ok(StrategyKind::LeastConnections),
            "random" => Ok(StrategyKind::Random),
            "least_response_time" => Ok(StrategyKind::LeastResponseTime),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// Strategy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StrategyConfig {
    /// Algorithm used by `select_instance`.
    pub kind: StrategyKind,
}

/// Circuit breaker configuration, applied to every instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time spent OPEN before a trial is admitted, in milliseconds.
    pub timeout_ms: u64,

    /// Trial calls admitted while HALF_OPEN.
    pub half_open_limit: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 30_000,
            half_open_limit: 1,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in milliseconds.
    pub interval_ms: u64,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before an unhealthy instance recovers.
    pub recovery_threshold: u32,

    /// Successful probes slower than this mark the instance degraded.
    pub degraded_latency_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            recovery_threshold: 2,
            degraded_latency_ms: 1_000,
        }
    }
}

/// A primary/backup pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverPairConfig {
    pub primary: String,
    pub backup: String,
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Return traffic to a recovered primary automatically.
    pub failback_enabled: bool,

    /// Consecutive healthy checks of the primary before failback.
    pub failback_threshold: u32,

    /// Pairs declared at startup.
    pub pairs: Vec<FailoverPairConfig>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failback_enabled: true,
            failback_threshold: 3,
            pairs: Vec::new(),
        }
    }
}

/// Traffic analytics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Request records kept for inspection.
    pub history_capacity: usize,

    /// Samples per instance used for the recent average response time.
    pub response_window: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            response_window: 20,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

/// Request dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Upstream call timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path requested from the selected instance by `HttpUpstream`.
    pub path: String,
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            path: "/api/data".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = BalancerConfig::default();
        assert_eq!(config.strategy.kind, StrategyKind::RoundRobin);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.timeout(), Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.half_open_limit, 1);
        assert_eq!(config.health_check.interval(), Duration::from_secs(5));
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.health_check.recovery_threshold, 2);
        assert_eq!(config.failover.failback_threshold, 3);
        assert_eq!(config.analytics.history_capacity, 100);
        assert_eq!(config.analytics.response_window, 20);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let raw = r#"
            [strategy]
            kind = "least_response_time"

            [[instances]]
            name = "a"
            address = "http://127.0.0.1:5001"

            [[instances]]
            name = "b"
            address = "http://127.0.0.1:5002"
            weight = 3
        "#;
        let config: BalancerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.strategy.kind, StrategyKind::LeastResponseTime);
        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances[0].weight, 1);
        assert_eq!(config.instances[1].weight, 3);
        assert!(config.health_check.enabled);
    }

    #[test]
    fn test_strategy_kind_from_str() {
        assert_eq!("weighted".parse::<StrategyKind>().unwrap(), StrategyKind::Weighted);
        assert_eq!("Random".parse::<StrategyKind>().unwrap(), StrategyKind::Random);
        assert!("fastest".parse::<StrategyKind>().is_err());
    }
}
