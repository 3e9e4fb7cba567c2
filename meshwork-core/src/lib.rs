//! Meshwork Core - Worker meshes wired by connectors
//!
//! This crate provides:
//! - Local and UDP connectors behind one queue abstraction
//! - A dispatcher multiplexing any number of inputs onto outputs
//! - A per-node leader supervising workers over control connectors
//! - Topology loading from a JSON config file

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod error;
pub mod leader;
pub mod message;
pub mod metrics;
pub mod runtime;
pub mod worker;

pub use config::{Config, NodeTopology, Topology};
pub use connector::{Channel, Connector, ExternalEgress, ExternalIngress, Local};
pub use dispatch::{Dispatcher, Policy};
pub use error::{MeshError, Result};
pub use leader::{Leader, LeaderConfig, Response};
pub use message::{ControlToken, Message};
pub use runtime::{NodeRuntime, ShutdownSignal};
pub use worker::{RelayWorker, Worker};

use std::time::Duration;

/// Bound on every leader control send and reply wait
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

/// Control port aliases are this prefix followed by the worker name
pub const CONTROL_PORT_PREFIX: &str = "MGMT_";

/// HTTP port when neither the environment nor the topology names one
pub const DEFAULT_GUI_PORT: u16 = 8080;
