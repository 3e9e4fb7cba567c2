//! Connectors between workers
//!
//! A connector is a named, one-way-by-convention link between two workers.
//! `Local` hands messages over an in-process queue, `ExternalIngress` and
//! `ExternalEgress` carry them over UDP. Workers only ever see the queue
//! returned by `channel()`, so both kinds are interchangeable to them.

pub mod channel;
pub mod codec;
pub mod external;
pub mod local;

pub use channel::{Channel, Inbox, Outbox};
pub use codec::PayloadDecoder;
pub use external::{Endpoint, ExternalEgress, ExternalIngress};
pub use local::Local;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

/// Lifecycle of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectorState {
    Unopened,
    Open,
    Closed,
}

/// Which way messages flow through a connector, from its owner's side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Owner receives
    Ingress,
    /// Owner sends
    Egress,
    /// Leader/worker request-reply link
    Control,
}

/// Capability set shared by all connector variants
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name (port alias), unique within a node
    fn name(&self) -> &str;

    fn direction(&self) -> Direction;

    fn state(&self) -> ConnectorState;

    /// Establish the transport and start any background tasks
    async fn open(&self) -> Result<()>;

    /// Release the transport and stop background tasks
    async fn close(&self) -> Result<()>;

    /// Queue endpoint to send to or receive from
    fn channel(&self) -> Channel;
}

/// Identity and queue shared by every connector variant
#[derive(Debug)]
pub struct Base {
    name: String,
    channel: Channel,
    state: Mutex<ConnectorState>,
}

impl Base {
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            channel,
            state: Mutex::new(ConnectorState::Unopened),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    /// Set the state, returning the previous one
    pub fn set_state(&self, state: ConnectorState) -> ConnectorState {
        std::mem::replace(&mut *self.state.lock(), state)
    }
}
