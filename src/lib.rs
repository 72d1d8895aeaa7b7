//! Service load balancer library.
//!
//! Distributes calls across registered service instances with pluggable
//! selection strategies, per-instance circuit breakers, active health
//! monitoring, primary/backup failover and traffic analytics.

pub mod analytics;
pub mod balancer;
pub mod config;
pub mod error;
pub mod failover;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod strategy;

pub use balancer::{Balancer, Dispatched, HttpUpstream, Upstream};
pub use config::schema::BalancerConfig;
pub use error::{BalancerError, BalancerResult};
pub use lifecycle::Shutdown;
