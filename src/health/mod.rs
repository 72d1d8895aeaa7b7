//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (monitor.rs)
//!     → Probe every registered instance concurrently (probe.rs)
//!     → Each probe bounded by the configured timeout
//!     → Streak counters on the instance → health transition
//!     → Failover controller check
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-instance, stored on the instance itself
//! - Probing never runs on the request path

pub mod monitor;
pub mod probe;

pub use monitor::{HealthMonitor, HealthSummary, MonitorHandle, ProbeReport};
pub use probe::{HttpProbe, Probe, ProbeOutcome};
