//! Network connectors over UDP
//!
//! `ExternalIngress` binds a port and decodes each datagram into the
//! registered payload type before queueing it. `ExternalEgress` dials a peer
//! and writes one datagram per queued message. Both own their background task
//! so `close` can stop and join it.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{self, PayloadDecoder, MAX_DATAGRAM};
use super::{Base, Channel, Connector, ConnectorState, Direction, Inbox, Outbox};
use crate::error::{MeshError, Result};
use crate::message::Message;
use crate::metrics::standard;

const RECV_RETRY_INITIAL: Duration = Duration::from_millis(10);
const RECV_RETRY_MAX: Duration = Duration::from_secs(1);

/// Peer address of an external connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Background task owned by an open connector
struct TransportTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TransportTask {
    async fn stop(self, connector: &str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("{}: transport task ended abnormally: {}", connector, e);
        }
    }
}

/// Receiving side of a UDP link
pub struct ExternalIngress {
    base: Base,
    endpoint: Endpoint,
    decoder: Mutex<Option<PayloadDecoder>>,
    local_addr: Mutex<Option<SocketAddr>>,
    task: tokio::sync::Mutex<Option<TransportTask>>,
}

impl ExternalIngress {
    /// The host of `endpoint` is ignored; ingress listens on all interfaces.
    pub fn new(base: Base, endpoint: Endpoint) -> Self {
        Self {
            base,
            endpoint,
            decoder: Mutex::new(None),
            local_addr: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Register the payload type inbound datagrams decode into. Must precede `open`.
    pub fn register<T>(&self)
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let decoder = PayloadDecoder::of::<T>();
        debug!("ExternalIngress: {} registered {}", self.base.name(), decoder.type_name());
        *self.decoder.lock() = Some(decoder);
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Address actually bound, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Connector for ExternalIngress {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn direction(&self) -> Direction {
        Direction::Ingress
    }

    fn state(&self) -> ConnectorState {
        self.base.state()
    }

    async fn open(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("ExternalIngress: {} already open", self.base.name());
            return Ok(());
        }

        let decoder = self
            .decoder
            .lock()
            .clone()
            .ok_or_else(|| MeshError::UnregisteredPayload {
                connector: self.base.name().to_string(),
            })?;

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], self.endpoint.port));
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            error!("ExternalIngress: {} cannot bind {}: {}", self.base.name(), bind_addr, e);
            MeshError::BindFailed {
                endpoint: bind_addr.to_string(),
                reason: e.to_string(),
            }
        })?;
        *self.local_addr.lock() = socket.local_addr().ok();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(receive_loop(
            self.base.name().to_string(),
            socket,
            decoder,
            self.base.channel().outbox(),
            cancel.clone(),
        ));
        *task = Some(TransportTask { cancel, handle });

        self.base.set_state(ConnectorState::Open);
        info!("ExternalIngress: connector {} is opened on {}", self.base.name(), bind_addr);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.stop(self.base.name()).await;
        }
        *self.local_addr.lock() = None;
        self.base.set_state(ConnectorState::Closed);
        info!("ExternalIngress: connector {} is closed", self.base.name());
        Ok(())
    }

    fn channel(&self) -> Channel {
        self.base.channel()
    }
}

/// Delay between failed socket reads: doubles per consecutive failure up to a cap
#[derive(Debug)]
struct RecvBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl RecvBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Delay to wait after another failure
    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(previous) => std::cmp::min(previous * 2, self.max),
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

async fn receive_loop(
    name: String,
    socket: UdpSocket,
    decoder: PayloadDecoder,
    outbox: Outbox,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut backoff = RecvBackoff::new(RECV_RETRY_INITIAL, RECV_RETRY_MAX);
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let len = match received {
            Ok((len, _)) => {
                backoff.reset();
                len
            }
            Err(e) => {
                let delay = backoff.next_delay();
                error!("ExternalIngress: {} receive failed, retrying in {:?}: {}", name, delay, e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        let message = match decoder.decode_frame(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                standard::CODEC_ERRORS.inc();
                error!("ExternalIngress: {} dropped datagram: {}", name, e);
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = outbox.send_async(message) => {
                if sent.is_err() {
                    debug!("ExternalIngress: {} queue dropped, stopping", name);
                    break;
                }
            }
        }
    }
}

/// Sending side of a UDP link
pub struct ExternalEgress {
    base: Base,
    endpoint: Endpoint,
    task: tokio::sync::Mutex<Option<TransportTask>>,
}

impl ExternalEgress {
    pub fn new(base: Base, endpoint: Endpoint) -> Self {
        Self {
            base,
            endpoint,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn dial(&self) -> Result<UdpSocket> {
        let target = self.endpoint.to_string();
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| MeshError::ResolveFailed {
                endpoint: target.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| MeshError::ResolveFailed {
                endpoint: target.clone(),
                reason: "no addresses".into(),
            })?;

        let local: SocketAddr = if addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await.map_err(|e| MeshError::BindFailed {
            endpoint: local.to_string(),
            reason: e.to_string(),
        })?;
        socket.connect(addr).await.map_err(|e| MeshError::DialFailed {
            endpoint: target,
            reason: e.to_string(),
        })?;
        Ok(socket)
    }
}

#[async_trait]
impl Connector for ExternalEgress {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn direction(&self) -> Direction {
        Direction::Egress
    }

    fn state(&self) -> ConnectorState {
        self.base.state()
    }

    async fn open(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("ExternalEgress: {} already open", self.base.name());
            return Ok(());
        }

        let socket = self.dial().await.map_err(|e| {
            error!("ExternalEgress: {} cannot reach {}: {}", self.base.name(), self.endpoint, e);
            e
        })?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(send_loop(
            self.base.name().to_string(),
            socket,
            self.base.channel().inbox(),
            cancel.clone(),
        ));
        *task = Some(TransportTask { cancel, handle });

        self.base.set_state(ConnectorState::Open);
        info!("ExternalEgress: connector {} is opened to {}", self.base.name(), self.endpoint);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.stop(self.base.name()).await;
        }
        self.base.set_state(ConnectorState::Closed);
        info!("ExternalEgress: connector {} is closed", self.base.name());
        Ok(())
    }

    fn channel(&self) -> Channel {
        self.base.channel()
    }
}

async fn send_loop(name: String, socket: UdpSocket, inbox: Inbox, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Flush what was queued before close
                while let Ok(message) = inbox.try_recv() {
                    write_datagram(&name, &socket, &message).await;
                }
                break;
            }
            received = inbox.recv_async() => match received {
                Ok(message) => write_datagram(&name, &socket, &message).await,
                Err(_) => break,
            },
        }
    }
}

async fn write_datagram(name: &str, socket: &UdpSocket, message: &Message) {
    let frame = match codec::encode_frame(message) {
        Ok(frame) => frame,
        Err(e) => {
            standard::CODEC_ERRORS.inc();
            error!("ExternalEgress: {} dropped message: {}", name, e);
            return;
        }
    };
    if let Err(e) = socket.send(&frame).await {
        error!("ExternalEgress: {} send failed: {}", name, e);
    }
}
