//! Failover subsystem.
//!
//! # Data Flow
//! ```text
//! Health monitor cycle completes
//!     → controller.rs check_and_failover()
//!     → assignment active target switched, event appended
//!     → standby_ids() consulted by every selection
//! ```
//!
//! # Design Decisions
//! - Failover is immediate, failback waits for consecutive healthy checks
//! - The inactive member of a pair never receives regular traffic
//! - With both members down the active target is held and flagged, not cleared

pub mod controller;

pub use controller::{
    FailoverAssignment, FailoverController, FailoverEvent, FailoverKind, FailoverStats,
};
