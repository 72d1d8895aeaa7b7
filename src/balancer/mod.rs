//! Balancer context: the request path.
//!
//! # Data Flow
//! ```text
//! dispatch(upstream)
//!     → select_instance (registry snapshot, failover standby set, strategy)
//!     → breaker acquire            (rejection: CircuitOpen, instance untouched)
//!     → lease connection slot      (released on drop)
//!     → upstream call under request timeout
//!     → breaker + analytics record the outcome
//! ```
//!
//! # Design Decisions
//! - One explicit context object; nothing is process-global
//! - Removal retires instances, so a selection racing a removal re-selects
//! - Retries always re-select; a rejected instance is never retried directly

pub mod upstream;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::analytics::TrafficAnalytics;
use crate::config::validation::{ensure_valid, validate_config};
use crate::config::{BalancerConfig, HealthCheckConfig, StrategyKind};
use crate::error::{BalancerError, BalancerResult};
use crate::failover::{FailoverController, FailoverEvent};
use crate::health::{HealthMonitor, Probe};
use crate::registry::{HealthStatus, InstanceStatus, ServiceInstance, ServiceRegistry};
use crate::resilience::RetryPolicy;
use crate::strategy::{build_strategy, SelectionStrategy, Snapshot};

pub use upstream::{HttpUpstream, Upstream};

/// A completed upstream call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatched {
    pub instance: String,
    pub response_time_ms: f64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

#[derive(Debug)]
pub struct Balancer {
    registry: Arc<ServiceRegistry>,
    analytics: Arc<TrafficAnalytics>,
    strategy: Box<dyn SelectionStrategy>,
    failover: Arc<FailoverController>,
    retry: RetryPolicy,
    request_timeout: Duration,
    health_config: HealthCheckConfig,
}

impl Balancer {
    /// Validate `config` and build every component from it.
    pub fn from_config(config: &BalancerConfig) -> BalancerResult<Self> {
        if let Err(errors) = validate_config(config) {
            ensure_valid(errors)?;
        }

        let registry = Arc::new(ServiceRegistry::from_config(
            &config.instances,
            config.circuit_breaker.clone(),
        )?);
        let analytics = Arc::new(TrafficAnalytics::new(&config.analytics)?);
        let failover = Arc::new(FailoverController::new(registry.clone(), &config.failover)?);
        let strategy = build_strategy(config.strategy.kind, analytics.clone());

        tracing::info!(
            instances = registry.len(),
            strategy = %config.strategy.kind,
            pairs = config.failover.pairs.len(),
            "Balancer initialized"
        );

        Ok(Self {
            registry,
            analytics,
            strategy,
            failover,
            retry: RetryPolicy::from_config(&config.retries),
            request_timeout: config.request.timeout(),
            health_config: config.health_check.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn analytics(&self) -> &Arc<TrafficAnalytics> {
        &self.analytics
    }

    pub fn failover(&self) -> &Arc<FailoverController> {
        &self.failover
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    // --- Registry surface ---

    pub fn add_instance(
        &self,
        name: &str,
        address: &str,
        weight: u32,
    ) -> BalancerResult<Arc<ServiceInstance>> {
        let instance = self.registry.add_instance(name, address, weight)?;
        self.analytics.clear_response_window(name);
        Ok(instance)
    }

    /// Remove an instance. Its latency window is dropped so a later instance
    /// with the same name starts unsampled; request counts are kept.
    pub fn remove_instance(&self, id: &str) -> BalancerResult<Arc<ServiceInstance>> {
        let removed = self.registry.remove_instance(id)?;
        self.analytics.clear_response_window(id);
        Ok(removed)
    }

    pub fn set_weight(&self, id: &str, weight: u32) -> BalancerResult<()> {
        self.registry.set_weight(id, weight)
    }

    pub fn set_health(&self, id: &str, status: HealthStatus) -> BalancerResult<()> {
        self.registry.set_health(id, status)
    }

    pub fn list_instances(&self) -> Vec<InstanceStatus> {
        self.registry.list()
    }

    // --- Selection ---

    /// Pick an eligible instance with the configured strategy.
    pub fn select_instance(&self) -> BalancerResult<Arc<ServiceInstance>> {
        let instances = self.registry.snapshot();
        let standby = self.failover.standby_ids();
        let snapshot = Snapshot::new(&instances).with_standby(&standby);

        match self.strategy.select(&snapshot) {
            Ok(instance) => {
                tracing::debug!(
                    instance = %instance.name(),
                    strategy = %self.strategy.kind(),
                    "Instance selected"
                );
                Ok(instance)
            }
            Err(e) => {
                tracing::warn!(
                    registered = instances.len(),
                    standby = standby.len(),
                    "No eligible instance"
                );
                Err(e)
            }
        }
    }

    // --- Request path ---

    /// Send one call through the breaker of a selected instance.
    pub async fn dispatch(&self, upstream: &dyn Upstream) -> BalancerResult<Dispatched> {
        // A fresh snapshot no longer contains a removed instance.
        let mut instance = self.select_instance()?;
        while instance.is_retired() {
            tracing::debug!(instance = %instance.name(), "Selected instance was removed, re-selecting");
            instance = self.select_instance()?;
        }

        self.call_instance(instance, upstream).await
    }

    /// Send one call to a named instance, bypassing selection. The breaker
    /// still applies.
    pub async fn dispatch_to(&self, id: &str, upstream: &dyn Upstream) -> BalancerResult<Dispatched> {
        let instance = self.registry.get(id)?;
        self.call_instance(instance, upstream).await
    }

    async fn call_instance(
        &self,
        instance: Arc<ServiceInstance>,
        upstream: &dyn Upstream,
    ) -> BalancerResult<Dispatched> {
        // Dropped unsettled if this future is cancelled mid-call.
        let permit = instance.breaker().acquire()?;
        let guard = instance.lease();

        let started = Instant::now();
        let result = tokio::time::timeout(self.request_timeout, upstream.call(&guard)).await;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        drop(guard);

        let name = instance.name().to_string();
        match result {
            Ok(Ok(())) => {
                permit.success();
                self.analytics.record_request(&name, true, response_time_ms);
                Ok(Dispatched {
                    instance: name,
                    response_time_ms,
                    attempts: 1,
                })
            }
            Ok(Err(message)) => {
                permit.failure();
                self.analytics.record_request(&name, false, response_time_ms);
                tracing::warn!(instance = %name, error = %message, "Upstream call failed");
                Err(BalancerError::Upstream {
                    instance: name,
                    message,
                })
            }
            Err(_) => {
                permit.failure();
                self.analytics.record_request(&name, false, response_time_ms);
                let millis = self.request_timeout.as_millis() as u64;
                tracing::warn!(instance = %name, timeout_ms = millis, "Upstream call timed out");
                Err(BalancerError::Timeout {
                    instance: name,
                    millis,
                })
            }
        }
    }

    /// `dispatch` with exponential backoff. Every attempt re-selects.
    pub async fn dispatch_with_retry(&self, upstream: &dyn Upstream) -> BalancerResult<Dispatched> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            match self.dispatch(upstream).await {
                Ok(mut dispatched) => {
                    dispatched.attempts = attempt;
                    return Ok(dispatched);
                }
                Err(e) if attempt < max_attempts && is_retryable(&e) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Dispatch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // --- Failover & health ---

    pub fn check_and_failover(&self) -> Vec<FailoverEvent> {
        self.failover.check_and_failover()
    }

    /// Build a monitor over this balancer's registry that drives its
    /// failover controller after each cycle.
    pub fn health_monitor(&self, probe: Arc<dyn Probe>) -> BalancerResult<Arc<HealthMonitor>> {
        Ok(Arc::new(HealthMonitor::new(
            self.registry.clone(),
            probe,
            self.health_config.clone(),
            Some(self.failover.clone()),
        )?))
    }
}

fn is_retryable(error: &BalancerError) -> bool {
    matches!(
        error,
        BalancerError::NoHealthyInstance | BalancerError::CircuitOpen { .. }
    ) || error.is_upstream_failure()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstanceConfig, RetryConfig};
    use futures_util::future::BoxFuture;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fails for every instance named in `failing`.
    #[derive(Default)]
    struct Scripted {
        failing: Mutex<HashSet<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl Upstream for Scripted {
        fn call<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, Result<(), String>> {
            self.calls.lock().unwrap().push(instance.name().to_string());
            let fail = self.failing.lock().unwrap().contains(instance.name());
            Box::pin(async move {
                if fail {
                    Err("boom".to_string())
                } else {
                    Ok(())
                }
            })
        }
    }

    fn config(names: &[&str]) -> BalancerConfig {
        BalancerConfig {
            instances: names
                .iter()
                .enumerate()
                .map(|(i, name)| InstanceConfig {
                    name: name.to_string(),
                    address: format!("http://127.0.0.1:{}", 8001 + i),
                    weight: 1,
                })
                .collect(),
            retries: RetryConfig {
                base_delay_ms: 1,
                max_delay_ms: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_records_analytics() {
        let balancer = Balancer::from_config(&config(&["a", "b"])).unwrap();
        let upstream = Scripted::default();
        for _ in 0..4 {
            balancer.dispatch(&upstream).await.unwrap();
        }
        let overall = balancer.analytics().get_overall_stats();
        assert_eq!(overall.total_requests, 4);
        assert_eq!(*upstream.calls.lock().unwrap(), vec!["a", "b", "a", "b"]);
        assert_eq!(balancer.registry().get("a").unwrap().active_connections(), 0);
    }

    #[tokio::test]
    async fn test_retry_moves_to_another_instance() {
        let balancer = Balancer::from_config(&config(&["a", "b"])).unwrap();
        let upstream = Scripted::default();
        upstream.failing.lock().unwrap().insert("a".into());

        let dispatched = balancer.dispatch_with_retry(&upstream).await.unwrap();
        assert_eq!(dispatched.instance, "b");
        assert_eq!(dispatched.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let balancer = Balancer::from_config(&config(&["a"])).unwrap();
        let upstream = Scripted::default();
        upstream.failing.lock().unwrap().insert("a".into());

        let err = balancer.dispatch_with_retry(&upstream).await.unwrap_err();
        assert!(err.is_upstream_failure());
        assert_eq!(upstream.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_standby_receives_no_traffic() {
        let mut cfg = config(&["p", "b", "x"]);
        cfg.failover.pairs.push(crate::config::FailoverPairConfig {
            primary: "p".into(),
            backup: "b".into(),
        });
        let balancer = Balancer::from_config(&cfg).unwrap();
        let upstream = Scripted::default();
        for _ in 0..6 {
            balancer.dispatch(&upstream).await.unwrap();
        }
        assert!(!upstream.calls.lock().unwrap().iter().any(|c| c == "b"));
    }

    struct Hanging;

    impl Upstream for Hanging {
        fn call<'a>(&'a self, _instance: &'a ServiceInstance) -> BoxFuture<'a, Result<(), String>> {
            Box::pin(futures_util::future::pending())
        }
    }

    #[tokio::test]
    async fn test_cancelled_trial_does_not_wedge_instance() {
        let mut cfg = config(&["a"]);
        cfg.circuit_breaker.failure_threshold = 1;
        cfg.circuit_breaker.timeout_ms = 20;
        let balancer = Balancer::from_config(&cfg).unwrap();
        let failing = Scripted::default();
        failing.failing.lock().unwrap().insert("a".into());
        assert!(balancer.dispatch(&failing).await.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), balancer.dispatch(&Hanging)).await;
        assert!(cancelled.is_err());

        let breaker = balancer.registry().get("a").unwrap().breaker().state();
        assert_eq!(breaker, crate::resilience::CircuitState::Open);
        assert_eq!(balancer.registry().get("a").unwrap().active_connections(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let dispatched = balancer.dispatch(&Scripted::default()).await.unwrap();
        assert_eq!(dispatched.instance, "a");
    }

    #[tokio::test]
    async fn test_readded_instance_starts_unsampled() {
        let balancer = Balancer::from_config(&config(&["a", "b"])).unwrap();
        balancer.analytics().record_request("a", true, 250.0);
        assert_eq!(balancer.analytics().recent_average("a"), Some(250.0));

        balancer.remove_instance("a").unwrap();
        assert_eq!(balancer.analytics().recent_average("a"), None);
        balancer.add_instance("a", "http://127.0.0.1:8001", 1).unwrap();
        assert_eq!(balancer.analytics().recent_average("a"), None);
        assert_eq!(balancer.analytics().get_overall_stats().total_requests, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config(&["a"]);
        cfg.instances[0].weight = 0;
        assert!(matches!(
            Balancer::from_config(&cfg).unwrap_err(),
            BalancerError::InvalidConfiguration(_)
        ));
    }
}
