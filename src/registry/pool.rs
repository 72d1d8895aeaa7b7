//! Instance registry.
//!
//! # Responsibilities
//! - Own the set of instances in registration order
//! - Serve lock-free snapshots to the request path and the health monitor
//! - Serialize membership changes behind a registry-level writer lock

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;

use crate::config::validation::{circuit_breaker_errors, ensure_valid};
use crate::config::{CircuitBreakerConfig, InstanceConfig};
use crate::error::{BalancerError, BalancerResult};
use crate::registry::instance::{HealthStatus, InstanceStatus, ServiceInstance};

/// Registry of service instances.
#[derive(Debug)]
pub struct ServiceRegistry {
    instances: ArcSwap<Vec<Arc<ServiceInstance>>>,
    writer: Mutex<()>,
    breaker_config: CircuitBreakerConfig,
}

impl ServiceRegistry {
    /// Create an empty registry; every added instance gets a breaker built
    /// from `breaker_config`.
    pub fn new(breaker_config: CircuitBreakerConfig) -> BalancerResult<Self> {
        ensure_valid(circuit_breaker_errors(&breaker_config))?;
        Ok(Self {
            instances: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            breaker_config,
        })
    }

    /// Create a registry pre-populated from configuration.
    pub fn from_config(
        instances: &[InstanceConfig],
        breaker_config: CircuitBreakerConfig,
    ) -> BalancerResult<Self> {
        let registry = Self::new(breaker_config)?;
        for config in instances {
            registry.add_instance(&config.name, &config.address, config.weight)?;
        }
        Ok(registry)
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new instance in the HEALTHY state.
    pub fn add_instance(
        &self,
        name: &str,
        address: &str,
        weight: u32,
    ) -> BalancerResult<Arc<ServiceInstance>> {
        let _guard = self.write_lock();
        let current = self.instances.load_full();
        if current.iter().any(|i| i.name() == name) {
            return Err(BalancerError::DuplicateInstance(name.to_string()));
        }

        let instance = Arc::new(ServiceInstance::new(
            name,
            address,
            weight,
            self.breaker_config.clone(),
        )?);

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(instance.clone());
        self.instances.store(Arc::new(next));

        tracing::info!(instance = %name, address = %address, weight, "Added instance");
        Ok(instance)
    }

    /// Remove an instance.
    ///
    /// The instance is retired before it leaves the snapshot, so a request that
    /// already selected it sees `is_retired()` and re-selects instead of calling it.
    pub fn remove_instance(&self, id: &str) -> BalancerResult<Arc<ServiceInstance>> {
        let _guard = self.write_lock();
        let current = self.instances.load_full();
        let position = current
            .iter()
            .position(|i| i.name() == id)
            .ok_or_else(|| BalancerError::NotFound(id.to_string()))?;

        let removed = current[position].clone();
        removed.retire();

        let next: Vec<_> = current
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, instance)| instance.clone())
            .collect();
        self.instances.store(Arc::new(next));

        tracing::info!(
            instance = %id,
            in_flight = removed.active_connections(),
            "Removed instance"
        );
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> BalancerResult<Arc<ServiceInstance>> {
        self.instances
            .load()
            .iter()
            .find(|i| i.name() == id)
            .cloned()
            .ok_or_else(|| BalancerError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.load().iter().any(|i| i.name() == id)
    }

    pub fn set_health(&self, id: &str, status: HealthStatus) -> BalancerResult<()> {
        self.get(id)?.set_health(status);
        Ok(())
    }

    pub fn set_weight(&self, id: &str, weight: u32) -> BalancerResult<()> {
        self.get(id)?.set_weight(weight)
    }

    pub fn increment_connections(&self, id: &str) -> BalancerResult<usize> {
        Ok(self.get(id)?.inc_connections())
    }

    pub fn decrement_connections(&self, id: &str) -> BalancerResult<usize> {
        Ok(self.get(id)?.dec_connections())
    }

    /// All instances in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<ServiceInstance>>> {
        self.instances.load_full()
    }

    /// Instances currently HEALTHY or DEGRADED, in registration order.
    pub fn healthy_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.instances
            .load()
            .iter()
            .filter(|i| i.is_routable())
            .cloned()
            .collect()
    }

    /// Status rows for every instance.
    pub fn list(&self) -> Vec<InstanceStatus> {
        self.instances.load().iter().map(|i| i.status()).collect()
    }

    pub fn len(&self) -> usize {
        self.instances.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new(CircuitBreakerConfig::default()).unwrap();
        registry.add_instance("a", "http://127.0.0.1:5001", 1).unwrap();
        registry.add_instance("b", "http://127.0.0.1:5002", 2).unwrap();
        registry.add_instance("c", "http://127.0.0.1:5003", 3).unwrap();
        registry
    }

    #[test]
    fn test_add_keeps_registration_order() {
        let r = registry();
        let names: Vec<_> = r.snapshot().iter().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let r = registry();
        assert_eq!(
            r.add_instance("a", "http://127.0.0.1:6000", 1).unwrap_err(),
            BalancerError::DuplicateInstance("a".into())
        );
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn test_remove_retires_and_missing_is_not_found() {
        let r = registry();
        let held = r.get("b").unwrap();
        let removed = r.remove_instance("b").unwrap();
        assert!(Arc::ptr_eq(&held, &removed));
        assert!(held.is_retired());
        assert!(!held.is_routable());
        assert!(!r.contains("b"));
        assert_eq!(
            r.remove_instance("b").unwrap_err(),
            BalancerError::NotFound("b".into())
        );
    }

    #[test]
    fn test_healthy_instances_includes_degraded() {
        let r = registry();
        r.set_health("a", HealthStatus::Unhealthy).unwrap();
        r.set_health("b", HealthStatus::Degraded).unwrap();
        let names: Vec<_> = r
            .healthy_instances()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_mutations_visible_immediately() {
        let r = registry();
        assert_eq!(r.increment_connections("c").unwrap(), 1);
        assert_eq!(r.get("c").unwrap().active_connections(), 1);
        assert_eq!(r.decrement_connections("c").unwrap(), 0);
        assert_eq!(r.decrement_connections("c").unwrap(), 0);

        r.set_weight("a", 7).unwrap();
        assert_eq!(r.list()[0].weight, 7);
        assert!(r.set_weight("a", 0).is_err());
        assert!(r.set_health("zzz", HealthStatus::Healthy).is_err());
    }

    #[test]
    fn test_invalid_breaker_config_rejected() {
        let config = CircuitBreakerConfig {
            half_open_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            ServiceRegistry::new(config),
            Err(BalancerError::InvalidConfiguration(_))
        ));
    }
}
