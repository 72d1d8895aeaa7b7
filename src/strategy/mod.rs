//! Instance selection strategies.
//!
//! # Data Flow
//! ```text
//! select_instance (balancer.rs)
//!     → registry snapshot + failover standby set → Snapshot
//!     → Apply selection algorithm:
//!         - round_robin.rs (rotate through the full list)
//!         - weighted.rs (smooth weighted round-robin)
//!         - least_conn.rs (fewest active connections)
//!         - random.rs (uniform pick)
//!         - least_response.rs (lowest recent average latency)
//!     → Arc<ServiceInstance> or NoHealthyInstance
//! ```
//!
//! # Design Decisions
//! - Strategies see the full registration-ordered list and ask the snapshot
//!   which entries are eligible, so cursors stay stable across health flaps
//! - One error contract for every variant: `NoHealthyInstance`
//! - Built once from configuration; callers only see `dyn SelectionStrategy`

pub mod least_conn;
pub mod least_response;
pub mod random;
pub mod round_robin;
pub mod weighted;

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use crate::analytics::TrafficAnalytics;
use crate::config::StrategyKind;
use crate::error::BalancerResult;
use crate::registry::ServiceInstance;

pub use least_conn::LeastConnections;
pub use least_response::LeastResponseTime;
pub use random::RandomSelect;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// Picks one instance from a snapshot.
pub trait SelectionStrategy: Send + Sync + Debug {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>>;

    fn kind(&self) -> StrategyKind;
}

/// The instances a strategy chooses from, in registration order.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    instances: &'a [Arc<ServiceInstance>],
    standby: Option<&'a HashSet<String>>,
}

impl<'a> Snapshot<'a> {
    pub fn new(instances: &'a [Arc<ServiceInstance>]) -> Self {
        Self {
            instances,
            standby: None,
        }
    }

    /// Exclude failover standby members from selection.
    pub fn with_standby(mut self, standby: &'a HashSet<String>) -> Self {
        self.standby = Some(standby);
        self
    }

    pub fn instances(&self) -> &'a [Arc<ServiceInstance>] {
        self.instances
    }

    /// Routable, breaker not OPEN, and not a standby.
    pub fn is_eligible(&self, instance: &ServiceInstance) -> bool {
        if let Some(standby) = self.standby {
            if standby.contains(instance.name()) {
                return false;
            }
        }
        instance.is_eligible()
    }

    /// Eligible instances with their registration index.
    pub fn eligible(&self) -> impl Iterator<Item = (usize, &'a Arc<ServiceInstance>)> + '_ {
        self.instances
            .iter()
            .enumerate()
            .filter(move |(_, instance)| self.is_eligible(instance))
    }
}

/// Construct the configured strategy.
pub fn build_strategy(
    kind: StrategyKind,
    analytics: Arc<TrafficAnalytics>,
) -> Box<dyn SelectionStrategy> {
    match kind {
        StrategyKind::RoundRobin => Box::new(RoundRobin::new()),
        StrategyKind::Weighted => Box::new(WeightedRoundRobin::new()),
        StrategyKind::LeastConnections => Box::new(LeastConnections::new()),
        StrategyKind::Random => Box::new(RandomSelect::new()),
        StrategyKind::LeastResponseTime => Box::new(LeastResponseTime::new(analytics)),
    }
}

#[cfg(test)]
pub(crate) fn test_pool(specs: &[(&str, u32)]) -> Vec<Arc<ServiceInstance>> {
    use crate::config::CircuitBreakerConfig;

    specs
        .iter()
        .enumerate()
        .map(|(i, (name, weight))| {
            Arc::new(
                ServiceInstance::new(
                    name,
                    &format!("http://127.0.0.1:{}", 5001 + i),
                    *weight,
                    CircuitBreakerConfig::default(),
                )
                .unwrap(),
            )
        })
        .collect()
}
