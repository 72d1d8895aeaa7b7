//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! add/remove (registry-level writer lock)
//!     → pool.rs publishes a new Arc<Vec<Arc<ServiceInstance>>>
//!
//! request path / health monitor
//!     → pool.rs snapshot (lock-free load)
//!     → instance.rs per-instance atomics (health, connections, streaks)
//!     → instance-owned circuit breaker
//! ```
//!
//! # Design Decisions
//! - Instances are shared by `Arc`, never copied and mutated independently
//! - Unrelated instances never contend: all per-instance state is atomic or
//!   behind the instance's own breaker mutex
//! - Removal retires the instance so captured references are invalidated

pub mod instance;
pub mod pool;

pub use instance::{ConnectionGuard, HealthStatus, InstanceStatus, ServiceInstance};
pub use pool::ServiceRegistry;
