//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger() → every subscribed background task leaves its loop
//!
//! Signals (signals.rs):
//!     SIGINT/SIGTERM → runner stops issuing requests → monitor stopped
//! ```
//!
//! # Design Decisions
//! - Background tasks own a receiver, never a flag they poll
//! - Stopping a task means signalling and then joining it

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
