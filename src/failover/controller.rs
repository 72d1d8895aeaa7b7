//! Primary/backup failover with hysteresis on failback.
//!
//! # Responsibilities
//! - Hold primary/backup assignments and the currently active member of each
//! - Switch to the backup when the primary goes UNHEALTHY
//! - Switch back after `failback_threshold` consecutive healthy checks
//! - Keep an append-only event history
//!
//! # State Transitions
//! ```text
//! active = primary, primary UNHEALTHY, backup HEALTHY  → active = backup ("primary unhealthy")
//! active = backup,  primary HEALTHY x threshold        → active = primary ("failback")
//! active member UNHEALTHY, no switch possible          → stalled (held until a member recovers)
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use serde::Serialize;

use crate::config::validation::{ensure_valid, failover_errors};
use crate::config::FailoverConfig;
use crate::error::{BalancerError, BalancerResult};
use crate::observability::metrics;
use crate::registry::{HealthStatus, ServiceRegistry};

const RECENT_EVENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverKind {
    Failover,
    Failback,
}

impl FailoverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverKind::Failover => "failover",
            FailoverKind::Failback => "failback",
        }
    }
}

/// A switch of the active target, in history order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverEvent {
    /// Never earlier than the previous event's timestamp.
    pub timestamp: SystemTime,
    pub kind: FailoverKind,
    pub from_id: String,
    pub to_id: String,
    pub reason: String,
}

/// A declared primary, its optional backup, and which one takes traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverAssignment {
    pub primary_id: String,
    pub backup_id: Option<String>,
    pub active_id: String,
    /// Consecutive healthy checks of the primary while on the backup.
    pub failback_counter: u32,
    /// The active member is UNHEALTHY and the other member cannot take over.
    pub stalled: bool,
}

impl FailoverAssignment {
    fn new(primary_id: &str) -> Self {
        Self {
            primary_id: primary_id.to_string(),
            backup_id: None,
            active_id: primary_id.to_string(),
            failback_counter: 0,
            stalled: false,
        }
    }

    fn on_backup(&self) -> bool {
        self.backup_id.as_deref() == Some(self.active_id.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailoverStats {
    pub total_failovers: usize,
    pub total_failbacks: usize,
    pub stalled: usize,
    pub recent_events: Vec<FailoverEvent>,
}

#[derive(Debug, Default)]
struct FailoverState {
    assignments: Vec<FailoverAssignment>,
    history: Vec<FailoverEvent>,
}

impl FailoverState {
    fn assignment_mut(&mut self, primary_id: &str) -> Option<&mut FailoverAssignment> {
        self.assignments
            .iter_mut()
            .find(|a| a.primary_id == primary_id)
    }

    fn next_timestamp(&self) -> SystemTime {
        let now = SystemTime::now();
        match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}

/// Failover controller.
#[derive(Debug)]
pub struct FailoverController {
    registry: Arc<ServiceRegistry>,
    failback_enabled: bool,
    failback_threshold: u32,
    state: Mutex<FailoverState>,
}

impl FailoverController {
    /// Create a controller and declare the configured pairs.
    pub fn new(registry: Arc<ServiceRegistry>, config: &FailoverConfig) -> BalancerResult<Self> {
        ensure_valid(failover_errors(config))?;
        let controller = Self {
            registry,
            failback_enabled: config.failback_enabled,
            failback_threshold: config.failback_threshold,
            state: Mutex::new(FailoverState::default()),
        };
        for pair in &config.pairs {
            controller.set_backup(&pair.primary, &pair.backup)?;
        }
        Ok(controller)
    }

    fn state(&self) -> MutexGuard<'_, FailoverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_registered(&self, id: &str) -> BalancerResult<()> {
        if self.registry.contains(id) {
            Ok(())
        } else {
            Err(BalancerError::NotFound(id.to_string()))
        }
    }

    /// Declare `primary_id` as a primary. Declaring twice is a no-op.
    pub fn set_primary(&self, primary_id: &str) -> BalancerResult<()> {
        self.ensure_registered(primary_id)?;
        let mut state = self.state();
        if state.assignment_mut(primary_id).is_none() {
            state.assignments.push(FailoverAssignment::new(primary_id));
            tracing::info!(primary = %primary_id, "Failover primary declared");
        }
        Ok(())
    }

    /// Attach a backup to a primary, declaring the primary if needed.
    /// Traffic returns to the primary and hysteresis restarts.
    pub fn set_backup(&self, primary_id: &str, backup_id: &str) -> BalancerResult<()> {
        if primary_id == backup_id {
            return Err(BalancerError::InvalidConfiguration(format!(
                "instance {} cannot back itself up",
                primary_id
            )));
        }
        self.ensure_registered(primary_id)?;
        self.ensure_registered(backup_id)?;

        let mut state = self.state();
        if state.assignment_mut(primary_id).is_none() {
            state.assignments.push(FailoverAssignment::new(primary_id));
        }
        if let Some(assignment) = state.assignment_mut(primary_id) {
            assignment.backup_id = Some(backup_id.to_string());
            assignment.active_id = primary_id.to_string();
            assignment.failback_counter = 0;
            assignment.stalled = false;
        }
        tracing::info!(primary = %primary_id, backup = %backup_id, "Failover pair configured");
        Ok(())
    }

    fn health_of(&self, id: &str) -> Option<HealthStatus> {
        self.registry.get(id).ok().map(|instance| instance.health())
    }

    /// Evaluate every pair once. Returns the events this call appended.
    pub fn check_and_failover(&self) -> Vec<FailoverEvent> {
        let mut state = self.state();
        let mut events = Vec::new();

        for index in 0..state.assignments.len() {
            let assignment = &state.assignments[index];
            let Some(backup_id) = assignment.backup_id.clone() else {
                continue;
            };
            let primary_id = assignment.primary_id.clone();
            let (Some(primary), Some(backup)) =
                (self.health_of(&primary_id), self.health_of(&backup_id))
            else {
                tracing::debug!(primary = %primary_id, backup = %backup_id, "Pair member not registered, skipping");
                continue;
            };

            let on_backup = assignment.on_backup();
            let mut switch: Option<(FailoverKind, String, String, &'static str)> = None;
            let mut counter = assignment.failback_counter;

            if !on_backup {
                if primary == HealthStatus::Unhealthy && backup == HealthStatus::Healthy {
                    switch = Some((
                        FailoverKind::Failover,
                        primary_id.clone(),
                        backup_id.clone(),
                        "primary unhealthy",
                    ));
                }
            } else if self.failback_enabled && primary == HealthStatus::Healthy {
                counter += 1;
                tracing::debug!(
                    primary = %primary_id,
                    healthy_checks = counter,
                    threshold = self.failback_threshold,
                    "Primary healthy while on backup"
                );
                if counter >= self.failback_threshold {
                    switch = Some((
                        FailoverKind::Failback,
                        backup_id.clone(),
                        primary_id.clone(),
                        "failback",
                    ));
                }
            } else {
                counter = 0;
            }

            if let Some((kind, from_id, to_id, reason)) = switch {
                let event = FailoverEvent {
                    timestamp: state.next_timestamp(),
                    kind,
                    from_id,
                    to_id: to_id.clone(),
                    reason: reason.to_string(),
                };
                tracing::warn!(
                    kind = kind.as_str(),
                    from = %event.from_id,
                    to = %event.to_id,
                    reason,
                    "Active target switched"
                );
                metrics::record_failover_event(kind.as_str());
                state.history.push(event.clone());
                events.push(event);

                let assignment = &mut state.assignments[index];
                assignment.active_id = to_id;
                assignment.failback_counter = 0;
            } else {
                state.assignments[index].failback_counter = counter;
            }

            let assignment = &mut state.assignments[index];
            let active_health = if assignment.on_backup() { backup } else { primary };
            let stalled = active_health == HealthStatus::Unhealthy;
            if stalled && !assignment.stalled {
                tracing::warn!(
                    primary = %primary_id,
                    backup = %backup_id,
                    active = %assignment.active_id,
                    "No healthy member to fail over to, holding active target"
                );
                metrics::record_failover_stalled(&primary_id);
            } else if !stalled && assignment.stalled {
                tracing::info!(primary = %primary_id, "Failover pair no longer stalled");
            }
            assignment.stalled = stalled;
        }

        events
    }

    /// Full event history, oldest first.
    pub fn get_failover_history(&self) -> Vec<FailoverEvent> {
        self.state().history.clone()
    }

    /// Member currently taking traffic for `primary_id`.
    pub fn active_target(&self, primary_id: &str) -> Option<String> {
        self.state()
            .assignments
            .iter()
            .find(|a| a.primary_id == primary_id)
            .map(|a| a.active_id.clone())
    }

    pub fn assignments(&self) -> Vec<FailoverAssignment> {
        self.state().assignments.clone()
    }

    /// Pair members that are not the active target; excluded from selection.
    /// A member whose active partner is no longer registered is not standby.
    pub fn standby_ids(&self) -> HashSet<String> {
        self.state()
            .assignments
            .iter()
            .filter_map(|a| {
                let backup = a.backup_id.as_ref()?;
                if !self.registry.contains(&a.active_id) {
                    return None;
                }
                Some(if a.on_backup() {
                    a.primary_id.clone()
                } else {
                    backup.clone()
                })
            })
            .collect()
    }

    pub fn stats(&self) -> FailoverStats {
        let state = self.state();
        let count = |kind: FailoverKind| state.history.iter().filter(|e| e.kind == kind).count();
        let skip = state.history.len().saturating_sub(RECENT_EVENTS);
        FailoverStats {
            total_failovers: count(FailoverKind::Failover),
            total_failbacks: count(FailoverKind::Failback),
            stalled: state.assignments.iter().filter(|a| a.stalled).count(),
            recent_events: state.history[skip..].to_vec(),
        }
    }
}
