//! Least response time selection strategy.

use std::sync::Arc;

use crate::analytics::TrafficAnalytics;
use crate::config::StrategyKind;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;
use crate::strategy::{SelectionStrategy, Snapshot};

/// Picks the eligible instance with the lowest recent average response time.
///
/// Instances without samples count as 0ms so they receive initial traffic.
/// DEGRADED instances are only considered when no HEALTHY one is eligible.
#[derive(Debug)]
pub struct LeastResponseTime {
    analytics: Arc<TrafficAnalytics>,
}

impl LeastResponseTime {
    pub fn new(analytics: Arc<TrafficAnalytics>) -> Self {
        Self { analytics }
    }
}

impl SelectionStrategy for LeastResponseTime {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>> {
        let (healthy, degraded): (Vec<_>, Vec<_>) = snapshot
            .eligible()
            .map(|(_, i)| i)
            .partition(|i| i.is_healthy());
        let candidates = if healthy.is_empty() { degraded } else { healthy };

        let mut best: Option<(&Arc<ServiceInstance>, f64)> = None;
        for instance in candidates {
            let average = self.analytics.recent_average(instance.name()).unwrap_or(0.0);
            if best.map_or(true, |(_, min)| average < min) {
                best = Some((instance, average));
            }
        }

        best.map(|(instance, _)| instance.clone())
            .ok_or(BalancerError::NoHealthyInstance)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastResponseTime
    }
}
