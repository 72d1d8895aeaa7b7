//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single service instance and its runtime state
//! - Track active connections (for Least Connections selection)
//! - Track health state (Healthy/Degraded/Unhealthy) and probe streaks
//! - Own the instance's circuit breaker

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::CircuitBreakerConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitBreakerSnapshot};

/// Health status of an instance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy = 0,
    Degraded = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// A single service instance.
#[derive(Debug)]
pub struct ServiceInstance {
    name: String,
    address: Url,
    weight: AtomicU32,
    health: AtomicU8,
    active_connections: AtomicUsize,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Milliseconds since the epoch of the last probe; 0 = never checked.
    last_checked_at_ms: AtomicU64,
    /// Set once the instance has been removed from the registry.
    retired: AtomicBool,
    breaker: CircuitBreaker,
}

impl ServiceInstance {
    /// Create a healthy instance with a closed breaker.
    pub fn new(
        name: &str,
        address: &str,
        weight: u32,
        breaker_config: CircuitBreakerConfig,
    ) -> BalancerResult<Self> {
        if name.trim().is_empty() {
            return Err(BalancerError::InvalidConfiguration(
                "instance name must not be empty".into(),
            ));
        }
        check_weight(name, weight)?;
        let address = Url::parse(address).map_err(|e| {
            BalancerError::InvalidConfiguration(format!(
                "instance {} has invalid address {}: {}",
                name, address, e
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            address,
            weight: AtomicU32::new(weight),
            health: AtomicU8::new(HealthStatus::Healthy as u8),
            active_connections: AtomicUsize::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_checked_at_ms: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            breaker: CircuitBreaker::new(name, breaker_config)?,
        })
    }

    /// Identity of the instance (its name).
    pub fn id(&self) -> &str {
        &self.name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Join a path onto the instance address.
    pub fn url_for(&self, path: &str) -> BalancerResult<Url> {
        self.address.join(path).map_err(|e| {
            BalancerError::InvalidConfiguration(format!("invalid path {}: {}", path, e))
        })
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn set_weight(&self, weight: u32) -> BalancerResult<()> {
        check_weight(&self.name, weight)?;
        self.weight.store(weight, Ordering::Relaxed);
        Ok(())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    // --- Health ---

    pub fn health(&self) -> HealthStatus {
        HealthStatus::from(self.health.load(Ordering::Acquire))
    }

    /// Overwrite health, returning the previous status.
    pub fn set_health(&self, status: HealthStatus) -> HealthStatus {
        let previous = HealthStatus::from(self.health.swap(status as u8, Ordering::AcqRel));
        if previous != status {
            tracing::info!(
                instance = %self.name,
                from = previous.as_str(),
                to = status.as_str(),
                "Instance health changed"
            );
            metrics::record_instance_health(&self.name, status);
        }
        previous
    }

    /// Strictly HEALTHY.
    pub fn is_healthy(&self) -> bool {
        self.health() == HealthStatus::Healthy
    }

    /// HEALTHY or DEGRADED and still registered.
    pub fn is_routable(&self) -> bool {
        self.health() != HealthStatus::Unhealthy && !self.is_retired()
    }

    /// Routable and the breaker would admit a call.
    pub fn is_eligible(&self) -> bool {
        self.is_routable() && self.breaker.is_available()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Relaxed)
    }

    /// Report a failed probe. Returns the new status if it changed.
    pub fn mark_failure(&self, unhealthy_threshold: u32) -> Option<HealthStatus> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.touch_checked();

        if failures >= unhealthy_threshold && self.health() != HealthStatus::Unhealthy {
            self.set_health(HealthStatus::Unhealthy);
            return Some(HealthStatus::Unhealthy);
        }
        None
    }

    /// Report a successful probe. `slow` marks a success above the degraded
    /// latency threshold. Returns the new status if it changed.
    pub fn mark_success(&self, recovery_threshold: u32, slow: bool) -> Option<HealthStatus> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        self.touch_checked();

        let current = self.health();
        let target = match current {
            HealthStatus::Unhealthy if successes < recovery_threshold => return None,
            _ if slow => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };

        if target != current {
            self.set_health(target);
            Some(target)
        } else {
            None
        }
    }

    fn touch_checked(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_checked_at_ms.store(now.max(1), Ordering::Relaxed);
    }

    pub fn last_checked_at(&self) -> Option<SystemTime> {
        match self.last_checked_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    // --- Connections ---

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) -> usize {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_active_connections(&self.name, count);
        count
    }

    /// Decrement active connection count, never below zero.
    pub fn dec_connections(&self) -> usize {
        let previous = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(1)))
            .unwrap_or(0);
        let count = previous.saturating_sub(1);
        metrics::record_active_connections(&self.name, count);
        count
    }

    /// Take a connection slot released when the guard drops.
    pub fn lease(self: &Arc<Self>) -> ConnectionGuard {
        self.inc_connections();
        ConnectionGuard {
            instance: self.clone(),
        }
    }

    // --- Lifecycle ---

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// True once removed from the registry; captured references must not be called.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            name: self.name.clone(),
            address: self.address.to_string(),
            weight: self.weight(),
            health: self.health(),
            active_connections: self.active_connections(),
            consecutive_failures: self.consecutive_failures(),
            consecutive_successes: self.consecutive_successes(),
            last_checked_at: self.last_checked_at(),
            breaker: self.breaker.snapshot(),
        }
    }
}

fn check_weight(name: &str, weight: u32) -> BalancerResult<()> {
    if weight == 0 {
        return Err(BalancerError::InvalidConfiguration(format!(
            "instance {} weight must be positive",
            name
        )));
    }
    Ok(())
}

/// Serializable status row for listings.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub name: String,
    pub address: String,
    pub weight: u32,
    pub health: HealthStatus,
    pub active_connections: usize,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_checked_at: Option<SystemTime>,
    pub breaker: CircuitBreakerSnapshot,
}

/// A RAII guard that manages the active connection count.
#[derive(Debug)]
pub struct ConnectionGuard {
    instance: Arc<ServiceInstance>,
}

impl ConnectionGuard {
    pub fn instance(&self) -> &Arc<ServiceInstance> {
        &self.instance
    }
}

impl Deref for ConnectionGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.instance.dec_connections();
    }
}
