//! Async runtime management for a node
//!
//! Separate Tokio runtimes for I/O and worker bodies, plus the leader's
//! shutdown signal.

pub mod executor;
pub mod shutdown;

pub use executor::{NodeRuntime, RuntimeConfig};
pub use shutdown::ShutdownSignal;
