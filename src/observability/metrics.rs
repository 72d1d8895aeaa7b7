//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_requests_total` (counter): dispatched requests by instance, outcome
//! - `balancer_request_duration_seconds` (histogram): upstream latency by instance
//! - `balancer_active_connections` (gauge): in-flight calls per instance
//! - `balancer_instance_health` (gauge): 1=healthy, 0.5=degraded, 0=unhealthy
//! - `balancer_breaker_transitions_total` (counter): breaker state changes
//! - `balancer_failover_events_total` (counter): failovers and failbacks
//! - `balancer_failover_stalled_total` (counter): checks with both pair members down
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in via `ObservabilityConfig`

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::registry::HealthStatus;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(instance: &str, success: bool, response_time_ms: f64) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "balancer_requests_total",
        "instance" => instance.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("balancer_request_duration_seconds", "instance" => instance.to_string())
        .record(response_time_ms / 1000.0);
}

pub fn record_active_connections(instance: &str, connections: usize) {
    gauge!("balancer_active_connections", "instance" => instance.to_string())
        .set(connections as f64);
}

pub fn record_instance_health(instance: &str, health: HealthStatus) {
    let value = match health {
        HealthStatus::Healthy => 1.0,
        HealthStatus::Degraded => 0.5,
        HealthStatus::Unhealthy => 0.0,
    };
    gauge!("balancer_instance_health", "instance" => instance.to_string()).set(value);
}

pub fn record_breaker_transition(instance: &str, from: &'static str, to: &'static str) {
    counter!(
        "balancer_breaker_transitions_total",
        "instance" => instance.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_failover_event(kind: &'static str) {
    counter!("balancer_failover_events_total", "kind" => kind).increment(1);
}

pub fn record_failover_stalled(primary: &str) {
    counter!("balancer_failover_stalled_total", "primary" => primary.to_string()).increment(1);
}
