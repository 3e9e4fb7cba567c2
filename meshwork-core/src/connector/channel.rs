//! Message queue backing every connector
//!
//! A `Channel` holds both ends of one FIFO queue so either endpoint can send
//! or receive through it. Capacity 0 makes every send a rendezvous hand-off.

use std::time::Duration;

use crate::error::{MeshError, Result};
use crate::message::Message;

/// Sending half of a connector queue
pub type Outbox = flume::Sender<Message>;

/// Receiving half of a connector queue
pub type Inbox = flume::Receiver<Message>;

/// Direction-agnostic queue endpoint
#[derive(Debug, Clone)]
pub struct Channel {
    tx: Outbox,
    rx: Inbox,
}

impl Channel {
    /// Queue holding at most `capacity` undelivered messages
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self { tx, rx }
    }

    /// Queue with no capacity limit
    pub fn unbounded() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Zero-capacity queue: a send completes only once a receiver takes it
    pub fn rendezvous() -> Self {
        Self::bounded(0)
    }

    /// Build from a topology buffer size (`None` = unbounded)
    pub fn with_buffer(buffer: Option<usize>) -> Self {
        match buffer {
            Some(capacity) => Self::bounded(capacity),
            None => Self::unbounded(),
        }
    }

    /// Clone of the sending half
    pub fn outbox(&self) -> Outbox {
        self.tx.clone()
    }

    /// Clone of the receiving half
    pub fn inbox(&self) -> Inbox {
        self.rx.clone()
    }

    /// Give up this endpoint, keeping only the halves
    pub fn split(self) -> (Outbox, Inbox) {
        (self.tx, self.rx)
    }

    /// Send, waiting for queue space
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.tx
            .send_async(message.into())
            .await
            .map_err(|_| MeshError::Disconnected { connector: "channel".into() })
    }

    /// Receive the next message in FIFO order
    pub async fn recv(&self) -> Result<Message> {
        self.rx
            .recv_async()
            .await
            .map_err(|_| MeshError::Disconnected { connector: "channel".into() })
    }

    /// Send, giving up after `timeout`. An abandoned send is withdrawn from the queue.
    pub async fn send_timeout(&self, message: impl Into<Message>, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.tx.send_async(message.into())).await,
            Ok(Ok(()))
        )
    }

    /// Receive, giving up after `timeout`
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        match tokio::time::timeout(timeout, self.rx.recv_async()).await {
            Ok(Ok(message)) => Some(message),
            _ => None,
        }
    }

    /// Take a message if one is immediately available
    pub fn try_recv(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Number of messages waiting in the queue
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Queue capacity, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}
