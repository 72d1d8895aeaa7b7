//! Least Connections selection strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::StrategyKind;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;
use crate::strategy::{SelectionStrategy, Snapshot};

/// Least connections selector.
/// Selects the eligible instance with the minimum number of active connections.
/// Ties go to the first candidate at or after a rotating cursor, so equal
/// instances share load instead of the lowest index taking everything.
#[derive(Debug, Default)]
pub struct LeastConnections {
    cursor: AtomicUsize,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for LeastConnections {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>> {
        let instances = snapshot.instances();
        let len = instances.len();
        if len == 0 {
            return Err(BalancerError::NoHealthyInstance);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut best: Option<(&Arc<ServiceInstance>, usize)> = None;

        for offset in 0..len {
            let instance = &instances[start.wrapping_add(offset) % len];
            if !snapshot.is_eligible(instance) {
                continue;
            }
            let connections = instance.active_connections();
            if best.map_or(true, |(_, min)| connections < min) {
                best = Some((instance, connections));
            }
        }

        best.map(|(instance, _)| instance.clone())
            .ok_or(BalancerError::NoHealthyInstance)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastConnections
    }
}
