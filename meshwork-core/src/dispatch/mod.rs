//! Fan-in / fan-out between connectors
//!
//! The dispatcher only holds queue halves, never the connectors themselves.

pub mod dispatcher;
pub mod policy;

pub use dispatcher::{DispatchHandle, DispatchStats, Dispatcher};
pub use policy::{CopyPolicy, DistributionPolicy, Policy, RoundRobinPolicy};
