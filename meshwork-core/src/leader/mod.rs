//! Node leader
//!
//! One leader per node supervises that node's workers over their control
//! connectors and keeps the last known state of each in the cache. Control
//! operations are served one at a time; the cache has its own lock so reads
//! never wait behind a slow worker.

pub mod cache;
pub mod control;
pub mod http;
pub mod response;

pub use cache::{Cache, Health, RunState, WorkerCacheEntry};
pub use control::ControlLink;
pub use response::Response;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::Connector;
use crate::error::{ConfigError, MeshError, Result};
use crate::message::{ControlToken, UNHEALTHY_REPLY};
use crate::metrics::standard;
use crate::runtime::ShutdownSignal;
use crate::worker::Worker;

/// Configuration for the leader
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// Hostname of the node this leader supervises
    pub node: String,
    /// Topology file, served back on `/config`
    pub config_path: Option<PathBuf>,
    /// HTTP port; falls back to the topology's `gui_port`
    pub gui_port: Option<u16>,
    /// Bound on every control send and every reply wait
    pub control_timeout: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            node: "localhost".into(),
            config_path: None,
            gui_port: None,
            control_timeout: crate::DEFAULT_CONTROL_TIMEOUT,
        }
    }
}

impl LeaderConfig {
    /// Read `MESHWORK_*` environment variables over the defaults
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(node) = std::env::var("MESHWORK_NODE") {
            config.node = node;
        }
        if let Ok(path) = std::env::var("MESHWORK_CONFIG") {
            config.config_path = Some(PathBuf::from(path));
        }
        if let Ok(port) = std::env::var("MESHWORK_GUI_PORT") {
            config.gui_port = Some(parse_env("MESHWORK_GUI_PORT", &port)?);
        }
        if let Ok(ms) = std::env::var("MESHWORK_CONTROL_TIMEOUT_MS") {
            config.control_timeout = Duration::from_millis(parse_env("MESHWORK_CONTROL_TIMEOUT_MS", &ms)?);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.into(),
        value: value.into(),
    })
}

/// Per-node supervisor
pub struct Leader {
    config: LeaderConfig,
    workers: Vec<Arc<dyn Worker>>,
    /// Worker name → leader end of its control connector
    ports: BTreeMap<String, Arc<dyn Connector>>,
    cache: Mutex<Cache>,
    /// Serializes control operations
    serial: tokio::sync::Mutex<()>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    spawner: Handle,
    shutdown: ShutdownSignal,
}

impl Leader {
    /// Every worker needs a control port. Worker tasks go to the current runtime unless overridden.
    pub fn new(
        config: LeaderConfig,
        workers: Vec<Arc<dyn Worker>>,
        ports: BTreeMap<String, Arc<dyn Connector>>,
    ) -> Result<Self> {
        if let Some(worker) = workers.iter().find(|w| !ports.contains_key(w.name())) {
            return Err(MeshError::UnknownPort {
                worker: worker.name().to_string(),
                alias: crate::worker::control_alias(worker.name()),
            });
        }

        let spawner = Handle::try_current().map_err(|e| MeshError::Internal {
            message: format!("leader created outside a runtime: {}", e),
        })?;

        Ok(Self {
            config,
            workers,
            ports,
            cache: Mutex::new(Cache::default()),
            serial: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(HashMap::new()),
            spawner,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Run worker bodies on another runtime
    pub fn with_spawner(mut self, spawner: Handle) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.node
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    /// Fired by `exit`
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Copy of the current cache
    pub fn cache_snapshot(&self) -> Cache {
        self.cache.lock().clone()
    }

    /// Initialize every worker and seed one cache entry per worker
    pub async fn init(&self) -> Result<()> {
        for port in self.ports.values() {
            port.open().await?;
        }
        for worker in &self.workers {
            worker.init().await?;
        }

        *self.cache.lock() = Cache::seed(self.workers.iter().map(|w| w.name().to_string()));
        info!("Leader: {} is initialized", self.name());
        Ok(())
    }

    /// Start every worker in its own task without waiting for them
    pub fn run(&self) {
        info!("Leader: {} is running...", self.name());
        for worker in &self.workers {
            self.spawn_worker(worker.clone());
            self.cache.lock().transition(worker.name(), RunState::Running);
        }
        self.refresh_running_gauge();
    }

    /// Re-initialize and re-run the workers, only when all of them are stopped
    pub async fn start(&self) -> Response {
        let _serial = self.serial.lock().await;

        if !self.cache.lock().all_stopped() {
            info!("Leader: {} workers are already running", self.name());
            return Response::fail("Workers already started.");
        }

        info!("Leader: {} is starting its workers...", self.name());
        let mut failed = Vec::new();
        for worker in &self.workers {
            let name = worker.name().to_string();
            self.join_worker(&name).await;

            // A worker that cannot initialize stays Stopped so a later start retries it
            if let Err(e) = worker.init().await {
                error!("Leader: worker {} failed to initialize: {}", name, e);
                failed.push(name);
                continue;
            }
            self.cache.lock().transition(&name, RunState::Initialized);
            self.spawn_worker(worker.clone());
            self.cache.lock().transition(&name, RunState::Running);
        }

        self.refresh_running_gauge();
        if failed.is_empty() {
            Response::ok("Workers started")
        } else {
            Response::fail(format!("Unable to start workers: {}", failed.join(", ")))
        }
    }

    /// Stop every worker; if they are all stopped already, stop the leader instead
    pub async fn stop(&self) -> Response {
        let _serial = self.serial.lock().await;

        if self.cache.lock().all_stopped() {
            self.exit();
            return Response::ok("Leader stopped");
        }

        info!("Leader: {} is stopping...", self.name());
        for link in self.links() {
            let name = link.worker();
            let current = self.cache.lock().get(name).map(|e| e.state);
            if current == Some(RunState::Stopped) {
                debug!("Leader: {} already stopped", name);
                continue;
            }

            info!("Worker: {} is stopping...", name);
            let next = match link.send(ControlToken::Stop).await {
                Ok(()) => RunState::Stopped,
                Err(_) => {
                    warn!("Unable to stop worker {}", name);
                    RunState::Unknown
                }
            };
            self.cache.lock().transition(name, next);
        }

        self.refresh_running_gauge();
        Response::ok("Workers stopped")
    }

    /// Aggregate health; short-circuits on the first unhealthy or silent worker
    pub async fn status(&self) -> Response {
        let _serial = self.serial.lock().await;

        for link in self.links() {
            let name = link.worker();
            let reply = match link.request(ControlToken::Status).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!("Unable to retrieve status of {}", name);
                    let mut cache = self.cache.lock();
                    cache.set_health(name, Health::Unknown);
                    cache.transition(name, RunState::Unknown);
                    drop(cache);
                    self.refresh_running_gauge();
                    return Response::fail("Unknown");
                }
            };

            info!("Received status from {}", name);
            let mut cache = self.cache.lock();
            cache.transition(name, RunState::Running);
            cache.set_status(name, reply.to_string());
            if reply.as_str() == Some(UNHEALTHY_REPLY) {
                cache.set_health(name, Health::Unhealthy);
                return Response::ok("Unhealthy");
            }
            cache.set_health(name, Health::Healthy);
        }

        self.refresh_running_gauge();
        Response::ok("Healthy")
    }

    /// Per-worker metrics; a silent worker reports "Unknown" without aborting the rest
    pub async fn metrics(&self) -> Response {
        let _serial = self.serial.lock().await;

        let mut metrics = serde_json::Map::new();
        for link in self.links() {
            let name = link.worker();
            let value = match link.request(ControlToken::Metrics).await {
                Ok(reply) => {
                    info!("Received metrics from {}", name);
                    let value = reply.into_value();
                    let mut cache = self.cache.lock();
                    cache.transition(name, RunState::Running);
                    cache.set_metric(name, value.clone());
                    value
                }
                Err(_) => {
                    warn!("Unable to retrieve metrics of {}", name);
                    Value::from("Unknown")
                }
            };
            metrics.insert(name.to_string(), value);
        }

        Response::ok(Value::Object(metrics))
    }

    /// The cache, verbatim
    pub fn cache(&self) -> Response {
        match serde_json::to_value(&*self.cache.lock()) {
            Ok(value) => Response::ok(value),
            Err(e) => Response::fail(e.to_string()),
        }
    }

    /// The topology file this node was built from
    pub async fn topology(&self) -> Response {
        let Some(path) = &self.config.config_path else {
            return Response::fail("Unable to load config file.");
        };

        let parsed = tokio::fs::read(path)
            .await
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()));

        match parsed {
            Ok(value) => Response::ok(value),
            Err(e) => {
                error!("Unable to load config file {}: {}", path.display(), e);
                Response::fail("Unable to load config file.")
            }
        }
    }

    /// Stop the leader. Worker tasks get no grace period beyond the control timeouts.
    pub fn exit(&self) {
        info!("Leader: {} is stopped.", self.name());
        self.shutdown.shutdown();
    }

    fn links(&self) -> Vec<ControlLink> {
        self.ports
            .iter()
            .map(|(worker, port)| ControlLink::new(worker, port.channel(), self.config.control_timeout))
            .collect()
    }

    fn spawn_worker(&self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        let task_name = name.clone();
        let handle = self.spawner.spawn(async move {
            match worker.run().await {
                Ok(()) => debug!("Worker {} returned", task_name),
                Err(e) => error!("Worker {} failed: {}", task_name, e),
            }
        });
        if let Some(previous) = self.tasks.lock().insert(name, handle) {
            previous.abort();
        }
    }

    /// Wait briefly for a stopped worker's task to release its ports, then abort it
    async fn join_worker(&self, name: &str) {
        let Some(mut handle) = self.tasks.lock().remove(name) else {
            return;
        };
        if tokio::time::timeout(self.config.control_timeout, &mut handle).await.is_err() {
            warn!("Worker {} still running after stop, aborting it", name);
            handle.abort();
            // Only a cancellation error is expected here
            let _ = handle.await;
        }
    }

    fn refresh_running_gauge(&self) {
        let running = self.cache.lock().count(RunState::Running);
        standard::RUNNING_WORKERS.set(running as i64);
    }
}
