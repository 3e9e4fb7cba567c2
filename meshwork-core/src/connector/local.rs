//! In-process connector
//!
//! The queue is the transport. There is no programmatic close of the queue:
//! either endpoint closing it first would break the other, so it is reclaimed
//! once both sides drop their handles.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Base, Channel, Connector, ConnectorState, Direction};
use crate::error::Result;

/// Connector backed by an in-process queue
#[derive(Debug)]
pub struct Local {
    base: Base,
    direction: Direction,
}

impl Local {
    pub fn new(base: Base, direction: Direction) -> Self {
        Self { base, direction }
    }

    /// Shorthand for a local connector over `channel`
    pub fn with_channel(name: impl Into<String>, channel: Channel, direction: Direction) -> Self {
        Self::new(Base::new(name, channel), direction)
    }
}

#[async_trait]
impl Connector for Local {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn state(&self) -> ConnectorState {
        self.base.state()
    }

    async fn open(&self) -> Result<()> {
        if self.base.set_state(ConnectorState::Open) == ConnectorState::Open {
            debug!("Local: {} already open", self.base.name());
            return Ok(());
        }
        info!("Local: {} is opened", self.base.name());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.base.set_state(ConnectorState::Closed);
        info!("Local: {} is closed", self.base.name());
        Ok(())
    }

    fn channel(&self) -> Channel {
        self.base.channel()
    }
}
