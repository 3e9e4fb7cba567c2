//! Topology configuration
//!
//! A single JSON file describes the whole distribution: every node, the
//! workers it runs and how their ports connect. Each node leader builds only
//! its own slice of it.
//!
//! Keys are accepted in lowercase or in the capitalized form older files use
//! (`Hostname`, `GUI_port`, ...). Numeric fields may be numbers or strings.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connector::{Base, Channel, Connector, Direction, Endpoint, ExternalEgress, ExternalIngress, Local};
use crate::dispatch::Policy;
use crate::error::{ConfigError, Result};
use crate::leader::{Leader, LeaderConfig};
use crate::message::Message;
use crate::worker::{control_alias, Ports, RelayWorker, Work, Worker};

/// Whole-distribution topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Whether nodes share a network file system
    #[serde(default, alias = "Nfs")]
    pub nfs: bool,

    /// Port every leader serves its control surface on
    #[serde(default, alias = "GUI_port", deserialize_with = "lenient_number")]
    pub gui_port: Option<u16>,

    #[serde(default, alias = "Nodes")]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(alias = "Hostname")]
    pub hostname: String,

    #[serde(default, alias = "Workers")]
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(alias = "Name")]
    pub name: String,

    /// Distribution policy; copy when absent
    #[serde(default, alias = "Policy")]
    pub policy: Option<Policy>,

    #[serde(default, alias = "Connections")]
    pub connections: Vec<Connection>,
}

/// One port of a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "type", alias = "Type")]
    pub kind: ConnectionKind,

    /// Peer worker
    #[serde(alias = "Worker")]
    pub worker: String,

    /// Port name on the owning worker
    #[serde(alias = "Alias")]
    pub alias: String,

    /// Queue capacity; unbounded when absent
    #[serde(default, alias = "Buffer", deserialize_with = "lenient_number")]
    pub buffer: Option<usize>,

    #[serde(default, alias = "Host")]
    pub host: Option<String>,

    #[serde(default, alias = "Port", deserialize_with = "lenient_number")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionKind {
    LocalIngress,
    LocalEgress,
    #[serde(rename = "ExternalUDPIngress")]
    ExternalUdpIngress,
    #[serde(rename = "ExternalUDPEgress")]
    ExternalUdpEgress,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

fn lenient_number<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + FromStr,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => T::try_from(n)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("{} is out of range", n))),
        Some(NumberOrString::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("{:?} is not a number", text)))
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_str(&raw)?;
        info!("Loaded topology from {} ({} nodes)", path.display(), config.nodes.len());
        Ok(config)
    }

    pub fn node(&self, hostname: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Workers of one node plus the leader's ends of their control connectors
pub struct NodeTopology {
    pub workers: Vec<Arc<dyn Worker>>,
    /// Worker name → leader side of its control connector
    pub control_ports: BTreeMap<String, Arc<dyn Connector>>,
}

impl NodeTopology {
    /// Hand everything to a new leader
    pub fn into_leader(self, config: LeaderConfig) -> Result<Leader> {
        Leader::new(config, self.workers, self.control_ports)
    }
}

/// Builds a node's workers and connectors from a topology
pub struct Topology;

impl Topology {
    pub fn build(config: &Config, hostname: &str, control_timeout: Duration) -> Result<NodeTopology> {
        let node = config
            .node(hostname)
            .ok_or_else(|| ConfigError::UnknownNode(hostname.to_string()))?;

        let local_names: HashSet<&str> = node.workers.iter().map(|w| w.name.as_str()).collect();
        // (egress worker, ingress worker) → shared queue
        let mut links: HashMap<(String, String), Channel> = HashMap::new();

        let mut workers: Vec<Arc<dyn Worker>> = Vec::with_capacity(node.workers.len());
        let mut control_ports: BTreeMap<String, Arc<dyn Connector>> = BTreeMap::new();

        for declared in &node.workers {
            if control_ports.contains_key(&declared.name) {
                return Err(invalid(&declared.name, &declared.name, "worker declared twice on this node").into());
            }

            let control = control_alias(&declared.name);
            let mut ports = Ports::new();

            for conn in &declared.connections {
                if conn.alias == control {
                    return Err(invalid(&declared.name, &conn.alias, "alias is reserved for the control port").into());
                }
                if ports.contains_key(&conn.alias) {
                    return Err(invalid(&declared.name, &conn.alias, "alias used twice").into());
                }

                let port = build_port(declared, conn, &local_names, &mut links)?;
                ports.insert(conn.alias.clone(), port);
            }

            let channel = Channel::rendezvous();
            ports.insert(
                control.clone(),
                Arc::new(Local::with_channel(control.clone(), channel.clone(), Direction::Control)),
            );
            control_ports.insert(
                declared.name.clone(),
                Arc::new(Local::with_channel(control.clone(), channel, Direction::Control)),
            );

            let work = Work::new(declared.name.clone(), ports, control)?.with_control_timeout(control_timeout);
            let policy = declared.policy.unwrap_or_default();
            debug!("Topology: worker {} uses {:?} policy", declared.name, policy);
            workers.push(Arc::new(RelayWorker::new(work, policy)));
        }

        info!("Topology: node {} has {} workers", hostname, workers.len());
        Ok(NodeTopology { workers, control_ports })
    }
}

fn build_port(
    owner: &WorkerConfig,
    conn: &Connection,
    local_names: &HashSet<&str>,
    links: &mut HashMap<(String, String), Channel>,
) -> Result<Arc<dyn Connector>> {
    let port: Arc<dyn Connector> = match conn.kind {
        ConnectionKind::LocalIngress | ConnectionKind::LocalEgress => {
            if !local_names.contains(conn.worker.as_str()) {
                return Err(invalid(&owner.name, &conn.alias, &format!("peer {} is not on this node", conn.worker)).into());
            }
            let (key, direction) = if conn.kind == ConnectionKind::LocalEgress {
                ((owner.name.clone(), conn.worker.clone()), Direction::Egress)
            } else {
                ((conn.worker.clone(), owner.name.clone()), Direction::Ingress)
            };
            let channel = links
                .entry(key)
                .or_insert_with(|| Channel::with_buffer(conn.buffer))
                .clone();
            Arc::new(Local::with_channel(conn.alias.clone(), channel, direction))
        }
        ConnectionKind::ExternalUdpIngress => {
            let port = required_port(owner, conn)?;
            let host = conn.host.clone().unwrap_or_else(|| "0.0.0.0".into());
            let ingress = ExternalIngress::new(
                Base::new(conn.alias.clone(), Channel::with_buffer(conn.buffer)),
                Endpoint::new(host, port),
            );
            ingress.register::<Message>();
            Arc::new(ingress)
        }
        ConnectionKind::ExternalUdpEgress => {
            let port = required_port(owner, conn)?;
            let host = conn
                .host
                .clone()
                .ok_or_else(|| invalid(&owner.name, &conn.alias, "external egress needs a host"))?;
            Arc::new(ExternalEgress::new(
                Base::new(conn.alias.clone(), Channel::with_buffer(conn.buffer)),
                Endpoint::new(host, port),
            ))
        }
    };
    Ok(port)
}

fn required_port(owner: &WorkerConfig, conn: &Connection) -> Result<u16> {
    conn.port
        .ok_or_else(|| invalid(&owner.name, &conn.alias, "external connection needs a port").into())
}

fn invalid(worker: &str, alias: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidConnection {
        worker: worker.to_string(),
        alias: alias.to_string(),
        reason: reason.to_string(),
    }
}
