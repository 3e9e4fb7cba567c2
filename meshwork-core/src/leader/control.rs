//! Leader side of the control protocol
//!
//! Every send and every receive on a control connector is bounded by the
//! control timeout. A timed-out send is withdrawn; a timed-out wait for a
//! reply is not, so workers must treat tokens idempotently.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::connector::Channel;
use crate::error::{MeshError, Result};
use crate::message::{ControlToken, Message};
use crate::metrics::standard;

/// Control link to one worker
#[derive(Debug, Clone)]
pub struct ControlLink {
    worker: String,
    channel: Channel,
    timeout: Duration,
}

impl ControlLink {
    pub fn new(worker: impl Into<String>, channel: Channel, timeout: Duration) -> Self {
        Self {
            worker: worker.into(),
            channel,
            timeout,
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Hand a token to the worker; taking it is the acknowledgment
    pub async fn send(&self, token: ControlToken) -> Result<()> {
        if self.channel.send_timeout(token, self.timeout).await {
            debug!("Leader: {} took {}", self.worker, token);
            Ok(())
        } else {
            Err(self.timed_out(token))
        }
    }

    /// Send a token and wait for the worker's reply
    pub async fn request(&self, token: ControlToken) -> Result<Message> {
        let start = Instant::now();
        self.send(token).await?;
        let reply = self
            .channel
            .recv_timeout(self.timeout)
            .await
            .ok_or_else(|| self.timed_out(token))?;
        standard::CONTROL_ROUNDTRIP.observe_since(start);
        Ok(reply)
    }

    fn timed_out(&self, token: ControlToken) -> MeshError {
        standard::CONTROL_TIMEOUTS.inc();
        warn!("Leader: {} did not answer {} in time", self.worker, token);
        MeshError::ControlTimeout {
            worker: self.worker.clone(),
            token: token.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}
