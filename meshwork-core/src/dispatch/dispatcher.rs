//! N-to-M dispatcher
//!
//! Waits on every input at once and hands whichever message arrives first to
//! the policy. Inputs that close leave the wait set; the task ends when the
//! set is empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{DistributionPolicy, Policy};
use crate::connector::{Inbox, Outbox};
use crate::error::{MeshError, Result};
use crate::metrics::standard;

/// Message counts of one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Messages read from inputs
    pub received: u64,
    /// Output deliveries (a copied message counts once per output)
    pub delivered: u64,
    /// Messages no output accepted
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Starts dispatch tasks
pub struct Dispatcher;

impl Dispatcher {
    /// Start a built-in policy between `inputs` and `outputs`
    pub fn activate(policy: Policy, outputs: Vec<Outbox>, inputs: Vec<Inbox>) -> Result<DispatchHandle> {
        Self::activate_with(policy.build(), outputs, inputs)
    }

    /// Start a custom policy. Fails without spawning if either side is empty.
    pub fn activate_with(
        policy: Box<dyn DistributionPolicy>,
        outputs: Vec<Outbox>,
        inputs: Vec<Inbox>,
    ) -> Result<DispatchHandle> {
        if inputs.is_empty() || outputs.is_empty() {
            return Err(MeshError::EmptyDispatch {
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }

        info!(
            "Dispatcher: {} from {} inputs to {} outputs",
            policy.name(),
            inputs.len(),
            outputs.len()
        );

        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run(
            policy,
            outputs,
            inputs,
            counters.clone(),
            cancel.clone(),
        ));

        Ok(DispatchHandle {
            cancel,
            counters,
            handle,
        })
    }
}

async fn run(
    mut policy: Box<dyn DistributionPolicy>,
    outputs: Vec<Outbox>,
    inputs: Vec<Inbox>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) -> DispatchStats {
    // An input's stream ends once it is closed and drained, which drops it from the set
    let mut wait_set = stream::select_all(inputs.into_iter().map(|input| input.into_stream()));
    let name = policy.name();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Dispatcher: {} cancelled", name);
                break;
            }
            next = wait_set.next() => match next {
                Some(message) => message,
                None => {
                    debug!("Dispatcher: {} inputs exhausted", name);
                    break;
                }
            },
        };

        counters.received.fetch_add(1, Ordering::Relaxed);
        // A full output must not hold off cancellation; the message in flight is dropped
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                standard::DROPPED_MESSAGES.inc();
                debug!("Dispatcher: {} cancelled during delivery", name);
                break;
            }
            outcome = policy.deliver(message, &outputs) => outcome,
        };

        match outcome {
            Ok(delivered) => {
                counters.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
                standard::DISPATCHED_MESSAGES.inc_by(delivered as u64);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                standard::DROPPED_MESSAGES.inc();
                warn!("Dispatcher: {} stopping: {}", name, e);
                break;
            }
        }
    }

    counters.snapshot()
}

/// Owned handle to a running dispatcher task
pub struct DispatchHandle {
    cancel: CancellationToken,
    counters: Arc<Counters>,
    handle: JoinHandle<DispatchStats>,
}

impl DispatchHandle {
    /// Live counts
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// True once the task has ended on its own or after cancellation
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the task to stop. A message still being delivered is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to end
    pub async fn join(self) -> Result<DispatchStats> {
        self.handle.await.map_err(|e| MeshError::Internal {
            message: format!("dispatcher task failed: {}", e),
        })
    }

    /// Cancel, then wait for the task to end
    pub async fn shutdown(self) -> Result<DispatchStats> {
        self.cancel();
        self.join().await
    }
}
