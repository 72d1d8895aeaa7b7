//! Traffic analytics subsystem.
//!
//! # Data Flow
//! ```text
//! Request completed (balancer.rs)
//!     → traffic.rs record_request
//!         → per-instance atomic counters (DashMap entry)
//!         → per-instance latency window (feeds least-response-time)
//!         → bounded request history ring
//! ```
//!
//! # Design Decisions
//! - Counters are atomic; only the ring buffer and latency windows take a
//!   short critical section
//! - Distribution reports `NoData` instead of dividing by zero

pub mod traffic;

pub use traffic::{
    InstanceShare, InstanceStats, OverallStats, RequestRecord, TrafficAnalytics,
    TrafficDistribution,
};
