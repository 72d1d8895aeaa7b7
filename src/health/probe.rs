//! Health probes.
//!
//! # Responsibilities
//! - Define the probe seam the monitor drives
//! - Provide the HTTP probe used in production
//!
//! # Design Decisions
//! - Probes report, they never fail: connection errors are unsuccessful outcomes
//! - Non-2xx is a failure; latency is measured on every outcome

use std::time::Instant;

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::config::HealthCheckConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: f64,
}

impl ProbeOutcome {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms,
        }
    }

    pub fn failure(latency_ms: f64) -> Self {
        Self {
            success: false,
            latency_ms,
        }
    }
}

/// Checks one instance. The monitor bounds every call with its own timeout.
pub trait Probe: Send + Sync {
    fn probe<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, ProbeOutcome>;
}

/// GET `{address}{path}`; any 2xx is healthy.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    path: String,
}

impl HttpProbe {
    pub fn new(config: &HealthCheckConfig) -> BalancerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("service-balancer-health-check")
            .build()
            .map_err(|e| {
                BalancerError::InvalidConfiguration(format!("health check client: {}", e))
            })?;
        Ok(Self {
            client,
            path: config.path.clone(),
        })
    }
}

impl Probe for HttpProbe {
    fn probe<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(async move {
            let started = Instant::now();
            let elapsed = || started.elapsed().as_secs_f64() * 1000.0;

            let url = match instance.url_for(&self.path) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(instance = %instance.name(), error = %e, "Failed to build health check URL");
                    return ProbeOutcome::failure(0.0);
                }
            };

            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => ProbeOutcome::success(elapsed()),
                Ok(response) => {
                    tracing::warn!(
                        instance = %instance.name(),
                        status = %response.status(),
                        "Health check failed: non-success status"
                    );
                    ProbeOutcome::failure(elapsed())
                }
                Err(e) => {
                    tracing::warn!(
                        instance = %instance.name(),
                        error = %e,
                        "Health check failed: connection error"
                    );
                    ProbeOutcome::failure(elapsed())
                }
            }
        })
    }
}
