//! Smooth weighted round-robin selection strategy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::StrategyKind;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;
use crate::strategy::{SelectionStrategy, Snapshot};

/// Smooth weighted round-robin.
///
/// Every selection raises each eligible instance's current weight by its
/// configured weight, picks the largest (earliest registered on ties), then
/// lowers the winner by the sum of eligible weights. Shares come out
/// proportional to weight and interleaved rather than in runs.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for WeightedRoundRobin {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>> {
        let eligible: Vec<_> = snapshot.eligible().map(|(_, i)| i).collect();
        if eligible.is_empty() {
            return Err(BalancerError::NoHealthyInstance);
        }

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        // Forget instances that have left the registry.
        current.retain(|name, _| snapshot.instances().iter().any(|i| i.name() == name));

        let total: i64 = eligible.iter().map(|i| i64::from(i.weight())).sum();
        let mut best: Option<(&Arc<ServiceInstance>, i64)> = None;

        for instance in eligible {
            let weight = i64::from(instance.weight());
            let entry = current.entry(instance.name().to_string()).or_insert(weight);
            *entry += weight;
            if best.map_or(true, |(_, max)| *entry > max) {
                best = Some((instance, *entry));
            }
        }

        let (winner, _) = best.ok_or(BalancerError::NoHealthyInstance)?;
        if let Some(entry) = current.get_mut(winner.name()) {
            *entry -= total;
        }
        Ok(winner.clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Weighted
    }
}
