//! Uniform random selection strategy.

use std::sync::Arc;

use crate::config::StrategyKind;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;
use crate::strategy::{SelectionStrategy, Snapshot};

/// Picks uniformly among eligible instances using the process-wide
/// `fastrand` generator.
#[derive(Debug, Default)]
pub struct RandomSelect;

impl RandomSelect {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for RandomSelect {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>> {
        let eligible: Vec<_> = snapshot.eligible().map(|(_, i)| i).collect();
        if eligible.is_empty() {
            return Err(BalancerError::NoHealthyInstance);
        }
        Ok(eligible[fastrand::usize(..eligible.len())].clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HealthStatus;
    use crate::strategy::test_pool;
    use std::collections::HashMap;

    #[test]
    fn test_only_eligible_and_all_reachable() {
        let lb = RandomSelect::new();
        let pool = test_pool(&[("a", 1), ("b", 1), ("c", 1)]);
        pool[2].set_health(HealthStatus::Unhealthy);

        let mut counts = HashMap::new();
        for _ in 0..400 {
            let picked = lb.select(&Snapshot::new(&pool)).unwrap();
            *counts.entry(picked.name().to_string()).or_insert(0) += 1;
        }
        assert!(!counts.contains_key("c"));
        assert!(counts["a"] > 100);
        assert!(counts["b"] > 100);
    }
}
