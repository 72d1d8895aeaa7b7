//! Round-robin selection strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::StrategyKind;
use crate::error::{BalancerError, BalancerResult};
use crate::registry::ServiceInstance;
use crate::strategy::{SelectionStrategy, Snapshot};

/// Round-robin selector.
///
/// The cursor indexes the full instance list, not just eligible entries, so
/// ordering survives health flaps. A compare-and-swap moves it exactly one
/// position past the returned instance; concurrent callers never share a step.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn select(&self, snapshot: &Snapshot<'_>) -> BalancerResult<Arc<ServiceInstance>> {
        let instances = snapshot.instances();
        let len = instances.len();
        if len == 0 {
            return Err(BalancerError::NoHealthyInstance);
        }

        let mut start = self.cursor.load(Ordering::Acquire);
        loop {
            let offset = (0..len)
                .find(|offset| snapshot.is_eligible(&instances[start.wrapping_add(*offset) % len]))
                .ok_or(BalancerError::NoHealthyInstance)?;

            match self.cursor.compare_exchange(
                start,
                start.wrapping_add(offset + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(instances[start.wrapping_add(offset) % len].clone()),
                Err(actual) => start = actual,
            }
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }
}
