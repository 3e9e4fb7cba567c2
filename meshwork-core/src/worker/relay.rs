//! Relay worker
//!
//! Forwards everything arriving on its ingress ports to its egress ports
//! through a dispatcher, and answers the leader's control tokens. Topology
//! files instantiate one of these per declared worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::state::WorkerPhase;
use super::{Ports, Work, Worker};
use crate::connector::Direction;
use crate::dispatch::{DispatchHandle, Dispatcher, Policy};
use crate::error::Result;
use crate::message::{ControlToken, Message, HEALTHY_REPLY, UNHEALTHY_REPLY};

pub struct RelayWorker {
    work: Work,
    policy: Policy,
}

impl RelayWorker {
    pub fn new(work: Work, policy: Policy) -> Self {
        Self { work, policy }
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    fn start_dispatch(&self) -> Result<Option<DispatchHandle>> {
        let inputs: Vec<_> = self
            .work
            .data_ports(Direction::Ingress)
            .into_iter()
            .map(|port| port.channel().inbox())
            .collect();
        let outputs: Vec<_> = self
            .work
            .data_ports(Direction::Egress)
            .into_iter()
            .map(|port| port.channel().outbox())
            .collect();

        if inputs.is_empty() || outputs.is_empty() {
            info!(
                "Worker {}: nothing to relay ({} in, {} out)",
                self.work.name(),
                inputs.len(),
                outputs.len()
            );
            return Ok(None);
        }

        Dispatcher::activate(self.policy, outputs, inputs).map(Some)
    }
}

#[async_trait]
impl Worker for RelayWorker {
    fn name(&self) -> &str {
        self.work.name()
    }

    fn ports(&self) -> &Ports {
        self.work.ports()
    }

    async fn init(&self) -> Result<()> {
        self.work.state().reset();
        info!("Worker {} is initialized", self.work.name());
        Ok(())
    }

    async fn run(self: Arc<Self>) -> Result<()> {
        let state = self.work.state().clone();
        let control = self.work.control()?;
        let run = state.begin_run();
        info!("Worker {} is running (run {})", self.work.name(), run);

        let dispatch = match self.work.open_all().await.and_then(|_| self.start_dispatch()) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                state.set_phase(WorkerPhase::Failed);
                self.work.close_all().await;
                return Err(e);
            }
        };

        while let Some(token) = control.next_command().await {
            match token {
                ControlToken::Status => {
                    let healthy = dispatch.as_ref().map_or(true, |d| !d.is_finished());
                    control
                        .reply(if healthy { HEALTHY_REPLY } else { UNHEALTHY_REPLY })
                        .await;
                }
                ControlToken::Metrics => {
                    let live = dispatch.as_ref().map(|d| d.stats()).unwrap_or_default();
                    let reply = Message::encode(&state.report(live)).unwrap_or_else(|e| {
                        warn!("Worker {}: cannot encode report: {}", self.work.name(), e);
                        Message::text("Unknown")
                    });
                    control.reply(reply).await;
                }
                ControlToken::Stop => {
                    info!("Worker {} is stopping", self.work.name());
                    break;
                }
            }
        }

        state.set_phase(WorkerPhase::Stopping);
        if let Some(dispatch) = dispatch {
            match dispatch.shutdown().await {
                Ok(stats) => state.absorb(stats),
                Err(e) => warn!("Worker {}: {}", self.work.name(), e),
            }
        }
        self.work.close_all().await;
        state.set_phase(WorkerPhase::Stopped);
        info!("Worker {} is stopped", self.work.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::connector::{Channel, Connector, ConnectorState, Local};
    use crate::worker::control_alias;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_with_stalled_egress() {
        let control = Channel::rendezvous();
        let inbound = Channel::unbounded();
        // One slot and no consumer: the second relayed message blocks
        let outbound = Channel::bounded(1);

        let alias = control_alias("relay");
        let mut ports = Ports::new();
        ports.insert(
            alias.clone(),
            Arc::new(Local::with_channel(alias.clone(), control.clone(), Direction::Control)),
        );
        ports.insert("in".into(), Arc::new(Local::with_channel("in", inbound.clone(), Direction::Ingress)));
        ports.insert("out".into(), Arc::new(Local::with_channel("out", outbound.clone(), Direction::Egress)));

        let work = Work::new("relay", ports, alias).unwrap();
        let worker = Arc::new(RelayWorker::new(work, Policy::Copy));
        worker.init().await.unwrap();
        let running = tokio::spawn(worker.clone().run());

        for text in ["T1", "T2", "T3"] {
            inbound.send(text).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(control.send_timeout("STOP", Duration::from_secs(1)).await);
        tokio::time::timeout(Duration::from_secs(3), running)
            .await
            .expect("relay did not stop")
            .unwrap()
            .unwrap();

        assert_eq!(worker.work().state().phase(), WorkerPhase::Stopped);
        for port in worker.ports().values() {
            assert_eq!(port.state(), ConnectorState::Closed);
        }
        assert_eq!(outbound.len(), 1);
    }
}
