//! Distribution policies
//!
//! A policy decides which outputs receive a message. Delivery is sequential:
//! one message is fully distributed before the next input is read.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connector::Outbox;
use crate::error::{MeshError, Result};
use crate::message::Message;

/// Built-in policy selector, as named in topology files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Every output receives every message
    #[default]
    Copy,
    /// Each message goes to exactly one output, in rotation
    #[serde(rename = "round_robin", alias = "roundrobin")]
    RoundRobin,
}

impl Policy {
    pub fn build(self) -> Box<dyn DistributionPolicy> {
        match self {
            Policy::Copy => Box::new(CopyPolicy),
            Policy::RoundRobin => Box::new(RoundRobinPolicy::default()),
        }
    }
}

/// Pluggable routing step of a dispatcher
#[async_trait]
pub trait DistributionPolicy: Send {
    fn name(&self) -> &'static str;

    /// Deliver one message, returning how many outputs accepted it.
    ///
    /// Fails with `AllOutputsClosed` when no output can accept anything anymore.
    async fn deliver(&mut self, message: Message, outputs: &[Outbox]) -> Result<usize>;
}

/// Duplicate every message to every output, in output order
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyPolicy;

#[async_trait]
impl DistributionPolicy for CopyPolicy {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn deliver(&mut self, message: Message, outputs: &[Outbox]) -> Result<usize> {
        let mut delivered = 0;
        for (index, output) in outputs.iter().enumerate() {
            if output.send_async(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                warn!("Copy: output {} is closed, skipping", index);
            }
        }

        if delivered == 0 {
            return Err(MeshError::AllOutputsClosed);
        }
        Ok(delivered)
    }
}

/// Rotate through outputs with one dispatcher-wide cursor
#[derive(Debug, Default, Clone)]
pub struct RoundRobinPolicy {
    cursor: usize,
}

impl RoundRobinPolicy {
    /// Index of the output the next message is offered to first
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

#[async_trait]
impl DistributionPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn deliver(&mut self, message: Message, outputs: &[Outbox]) -> Result<usize> {
        let count = outputs.len();
        let mut message = message;

        // A closed output passes its turn to the next one
        for attempt in 0..count {
            let index = (self.cursor + attempt) % count;
            match outputs[index].send_async(message).await {
                Ok(()) => {
                    self.cursor = (index + 1) % count;
                    return Ok(1);
                }
                Err(flume::SendError(returned)) => {
                    warn!("RoundRobin: output {} is closed, trying next", index);
                    message = returned;
                }
            }
        }

        Err(MeshError::AllOutputsClosed)
    }
}
