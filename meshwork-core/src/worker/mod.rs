//! Workers
//!
//! A worker is a named unit of computation owning its ports. One port, the
//! control port, is reserved for tokens from the node leader.

pub mod control;
pub mod relay;
pub mod state;

pub use control::ControlPort;
pub use relay::RelayWorker;
pub use state::{WorkerPhase, WorkerReport, WorkerState};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use crate::connector::{Connector, Direction};
use crate::error::{MeshError, Result};

/// Port alias → connector
pub type Ports = HashMap<String, Arc<dyn Connector>>;

/// Capability set every worker implements
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn ports(&self) -> &Ports;

    /// Prepare for a (re)run
    async fn init(&self) -> Result<()>;

    /// Do the work until told to stop
    async fn run(self: Arc<Self>) -> Result<()>;
}

/// Alias of the control port for `worker`
pub fn control_alias(worker: &str) -> String {
    format!("{}{}", crate::CONTROL_PORT_PREFIX, worker)
}

/// Name, ports and state shared by worker implementations
pub struct Work {
    name: String,
    ports: Ports,
    control_alias: String,
    control_timeout: Duration,
    state: Arc<WorkerState>,
}

impl Work {
    /// Fails if `control_alias` is not one of `ports`
    pub fn new(name: impl Into<String>, ports: Ports, control_alias: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let control_alias = control_alias.into();
        if !ports.contains_key(&control_alias) {
            return Err(MeshError::UnknownPort {
                worker: name,
                alias: control_alias,
            });
        }

        Ok(Self {
            name,
            ports,
            control_alias,
            control_timeout: crate::DEFAULT_CONTROL_TIMEOUT,
            state: Arc::new(WorkerState::new()),
        })
    }

    /// Override how long control replies wait for the leader
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn port(&self, alias: &str) -> Result<&Arc<dyn Connector>> {
        self.ports.get(alias).ok_or_else(|| MeshError::UnknownPort {
            worker: self.name.clone(),
            alias: alias.to_string(),
        })
    }

    pub fn control_alias(&self) -> &str {
        &self.control_alias
    }

    /// Worker side of the control connector
    pub fn control(&self) -> Result<ControlPort> {
        let port = self.port(&self.control_alias)?;
        Ok(ControlPort::new(&self.name, port.channel(), self.control_timeout))
    }

    /// Data ports flowing in the given direction, sorted by alias
    pub fn data_ports(&self, direction: Direction) -> Vec<&Arc<dyn Connector>> {
        let mut ports: Vec<_> = self
            .ports
            .iter()
            .filter(|(alias, port)| *alias != &self.control_alias && port.direction() == direction)
            .collect();
        ports.sort_by(|a, b| a.0.cmp(b.0));
        ports.into_iter().map(|(_, port)| port).collect()
    }

    /// Open every port, stopping at the first failure
    pub async fn open_all(&self) -> Result<()> {
        for (alias, port) in &self.ports {
            if let Err(e) = port.open().await {
                error!("Worker {}: port {} unusable: {}", self.name, alias, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Close every port, logging failures
    pub async fn close_all(&self) {
        for (alias, port) in &self.ports {
            if let Err(e) = port.close().await {
                error!("Worker {}: closing port {} failed: {}", self.name, alias, e);
            }
        }
    }
}
