//! Active health monitoring.
//!
//! # Responsibilities
//! - Periodically probe every registered instance concurrently
//! - Update instance health from probe streaks
//! - Run the failover check after each cycle
//!
//! # State Transitions
//! ```text
//! any        → UNHEALTHY: consecutive failures >= unhealthy_threshold
//! UNHEALTHY  → HEALTHY:   consecutive successes >= recovery_threshold
//! HEALTHY    → DEGRADED:  successful probe slower than degraded_latency_ms
//! DEGRADED   → HEALTHY:   one fast successful probe
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::validation::{ensure_valid, health_check_errors};
use crate::config::HealthCheckConfig;
use crate::error::BalancerResult;
use crate::failover::FailoverController;
use crate::health::probe::{Probe, ProbeOutcome};
use crate::lifecycle::Shutdown;
use crate::registry::{HealthStatus, InstanceStatus, ServiceInstance, ServiceRegistry};

/// Outcome of probing one instance in a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub instance: String,
    pub outcome: ProbeOutcome,
    /// New status when this probe changed it.
    pub transition: Option<HealthStatus>,
}

/// Counts per health state plus per-instance rows.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub instances: Vec<InstanceStatus>,
}

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn Probe>,
    config: HealthCheckConfig,
    failover: Option<Arc<FailoverController>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn Probe>,
        config: HealthCheckConfig,
        failover: Option<Arc<FailoverController>>,
    ) -> BalancerResult<Self> {
        ensure_valid(health_check_errors(&config))?;
        Ok(Self {
            registry,
            probe,
            config,
            failover,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Run a single probe cycle and apply its results.
    ///
    /// Results are discarded if the monitor was stopped while probes were in
    /// flight.
    pub async fn check_once(&self) -> Vec<ProbeReport> {
        let instances = self.registry.snapshot();
        let outcomes = join_all(instances.iter().map(|instance| self.probe_bounded(instance))).await;

        if self.is_stopped() {
            tracing::debug!("Health monitor stopped during cycle, discarding results");
            return Vec::new();
        }

        let reports = instances
            .iter()
            .zip(outcomes)
            .filter(|(instance, _)| !instance.is_retired())
            .map(|(instance, outcome)| self.apply(instance, outcome))
            .collect();

        if let Some(failover) = &self.failover {
            failover.check_and_failover();
        }
        reports
    }

    async fn probe_bounded(&self, instance: &ServiceInstance) -> ProbeOutcome {
        let started = Instant::now();
        match time::timeout(self.config.timeout(), self.probe.probe(instance)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    instance = %instance.name(),
                    timeout_ms = self.config.timeout_ms,
                    "Health check failed: timeout"
                );
                ProbeOutcome::failure(started.elapsed().as_secs_f64() * 1000.0)
            }
        }
    }

    fn apply(&self, instance: &ServiceInstance, outcome: ProbeOutcome) -> ProbeReport {
        let transition = if outcome.success {
            let slow = outcome.latency_ms > self.config.degraded_latency_ms as f64;
            instance.mark_success(self.config.recovery_threshold, slow)
        } else {
            instance.mark_failure(self.config.unhealthy_threshold)
        };

        tracing::debug!(
            instance = %instance.name(),
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            health = instance.health().as_str(),
            "Probe applied"
        );

        ProbeReport {
            instance: instance.name().to_string(),
            outcome,
            transition,
        }
    }

    /// Probe on every interval tick until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }
            if self.is_stopped() {
                break;
            }
            tokio::select! {
                _ = self.check_once() => {}
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Health monitor received shutdown signal, exiting loop");
    }

    /// Start the periodic loop on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> MonitorHandle {
        self.stopped.store(false, Ordering::Release);
        let shutdown = Shutdown::new();
        let task = tokio::spawn(self.clone().run(shutdown.subscribe()));
        MonitorHandle {
            monitor: self.clone(),
            shutdown,
            task,
        }
    }

    pub fn summary(&self) -> HealthSummary {
        let instances = self.registry.list();
        let count = |status: HealthStatus| instances.iter().filter(|i| i.health == status).count();
        HealthSummary {
            total: instances.len(),
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            instances,
        }
    }
}

/// Handle to a spawned monitor loop.
#[derive(Debug)]
pub struct MonitorHandle {
    monitor: Arc<HealthMonitor>,
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the loop and wait for it to exit. No probe result is applied
    /// after this returns.
    pub async fn stop(self) {
        self.monitor.stopped.store(true, Ordering::Release);
        self.shutdown.trigger();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Health monitor task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedProbe {
        outcomes: Mutex<HashMap<String, ProbeOutcome>>,
    }

    impl ScriptedProbe {
        fn set(&self, name: &str, outcome: ProbeOutcome) {
            self.outcomes.lock().unwrap().insert(name.to_string(), outcome);
        }
    }

    impl Probe for ScriptedProbe {
        fn probe<'a>(&'a self, instance: &'a ServiceInstance) -> BoxFuture<'a, ProbeOutcome> {
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get(instance.name())
                .copied()
                .unwrap_or(ProbeOutcome::success(1.0));
            Box::pin(async move { outcome })
        }
    }

    struct HangingProbe;

    impl Probe for HangingProbe {
        fn probe<'a>(&'a self, _instance: &'a ServiceInstance) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(std::future::pending())
        }
    }

    fn registry(names: &[&str]) -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new(CircuitBreakerConfig::default()).unwrap());
        for (i, name) in names.iter().enumerate() {
            registry
                .add_instance(name, &format!("http://127.0.0.1:{}", 7001 + i), 1)
                .unwrap();
        }
        registry
    }

    fn config() -> HealthCheckConfig {
        HealthCheckConfig {
            interval_ms: 10,
            timeout_ms: 50,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_three_failures_mark_unhealthy() {
        let registry = registry(&["a", "b"]);
        let probe = Arc::new(ScriptedProbe::default());
        probe.set("a", ProbeOutcome::failure(1.0));
        let monitor = HealthMonitor::new(registry.clone(), probe, config(), None).unwrap();

        monitor.check_once().await;
        monitor.check_once().await;
        assert_eq!(registry.get("a").unwrap().health(), HealthStatus::Healthy);

        let reports = monitor.check_once().await;
        let a = reports.iter().find(|r| r.instance == "a").unwrap();
        assert_eq!(a.transition, Some(HealthStatus::Unhealthy));
        assert_eq!(registry.get("b").unwrap().health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_recovery_and_degraded() {
        let registry = registry(&["a"]);
        let probe = Arc::new(ScriptedProbe::default());
        let monitor =
            HealthMonitor::new(registry.clone(), probe.clone(), config(), None).unwrap();
        registry.set_health("a", HealthStatus::Unhealthy).unwrap();

        monitor.check_once().await;
        assert_eq!(registry.get("a").unwrap().health(), HealthStatus::Unhealthy);
        monitor.check_once().await;
        assert_eq!(registry.get("a").unwrap().health(), HealthStatus::Healthy);

        probe.set("a", ProbeOutcome::success(1_500.0));
        monitor.check_once().await;
        assert_eq!(registry.get("a").unwrap().health(), HealthStatus::Degraded);

        probe.set("a", ProbeOutcome::success(3.0));
        monitor.check_once().await;
        assert_eq!(registry.get("a").unwrap().health(), HealthStatus::Healthy);
        assert!(registry.get("a").unwrap().last_checked_at().is_some());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let registry = registry(&["a"]);
        let monitor =
            HealthMonitor::new(registry.clone(), Arc::new(HangingProbe), config(), None).unwrap();
        let reports = monitor.check_once().await;
        assert!(!reports[0].outcome.success);
        assert_eq!(registry.get("a").unwrap().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_stop_prevents_further_updates() {
        let registry = registry(&["a"]);
        let probe = Arc::new(ScriptedProbe::default());
        probe.set("a", ProbeOutcome::failure(1.0));
        let monitor =
            Arc::new(HealthMonitor::new(registry.clone(), probe, config(), None).unwrap());

        let handle = monitor.spawn();
        time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        let failures = registry.get("a").unwrap().consecutive_failures();
        assert!(failures >= 1);
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.get("a").unwrap().consecutive_failures(), failures);
        assert!(monitor.check_once().await.is_empty());
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let registry = registry(&["a", "b", "c"]);
        let monitor = HealthMonitor::new(
            registry.clone(),
            Arc::new(ScriptedProbe::default()),
            config(),
            None,
        )
        .unwrap();
        registry.set_health("b", HealthStatus::Degraded).unwrap();
        registry.set_health("c", HealthStatus::Unhealthy).unwrap();

        let summary = monitor.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.unhealthy, 1);
    }
}
