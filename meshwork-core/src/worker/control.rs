//! Worker side of the control connector
//!
//! The control queue is a rendezvous link shared with the leader: a token is
//! acknowledged by being taken, and replies travel back over the same queue.

use std::time::Duration;

use tracing::{debug, warn};

use crate::connector::Channel;
use crate::message::{ControlToken, Message};

/// Receives control tokens and sends replies for one worker
#[derive(Debug, Clone)]
pub struct ControlPort {
    worker: String,
    channel: Channel,
    reply_timeout: Duration,
}

impl ControlPort {
    pub fn new(worker: impl Into<String>, channel: Channel, reply_timeout: Duration) -> Self {
        Self {
            worker: worker.into(),
            channel,
            reply_timeout,
        }
    }

    /// Wait for the next recognized token. `None` once the leader side is gone.
    pub async fn next_command(&self) -> Option<ControlToken> {
        loop {
            let message = self.channel.recv().await.ok()?;
            match ControlToken::parse(&message) {
                Some(token) => {
                    debug!("Worker {}: received {}", self.worker, token);
                    return Some(token);
                }
                None => warn!("Worker {}: ignoring control payload {}", self.worker, message),
            }
        }
    }

    /// Answer the last token. Gives up if the leader stopped waiting.
    pub async fn reply(&self, message: impl Into<Message>) -> bool {
        let delivered = self.channel.send_timeout(message, self.reply_timeout).await;
        if !delivered {
            warn!("Worker {}: leader did not take reply", self.worker);
        }
        delivered
    }
}
