//! Error types for Meshwork
//!
//! Taxonomy follows how failures are handled at runtime: configuration
//! errors fail fast, transport errors disable one connector, codec errors
//! drop one message, control errors degrade one cache entry.

use thiserror::Error;

/// Primary error type for all Meshwork operations
#[derive(Debug, Error)]
pub enum MeshError {
    // ========== Configuration Errors ==========

    /// Dispatcher activated without inputs or outputs
    #[error("Dispatcher requires at least one input and one output (inputs={inputs}, outputs={outputs})")]
    EmptyDispatch { inputs: usize, outputs: usize },

    /// Ingress connector opened before a payload type was registered
    #[error("Connector {connector} has no registered payload type")]
    UnregisteredPayload { connector: String },

    /// Topology could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Port alias not present on a worker
    #[error("Worker {worker} has no port named {alias}")]
    UnknownPort { worker: String, alias: String },

    // ========== Transport Errors ==========

    /// Address could not be resolved
    #[error("Failed to resolve {endpoint}: {reason}")]
    ResolveFailed { endpoint: String, reason: String },

    /// Socket could not be bound
    #[error("Failed to bind {endpoint}: {reason}")]
    BindFailed { endpoint: String, reason: String },

    /// Socket could not be connected
    #[error("Failed to dial {endpoint}: {reason}")]
    DialFailed { endpoint: String, reason: String },

    /// Connector used before open or after close
    #[error("Connector {connector} is not open")]
    NotOpen { connector: String },

    /// Every receiving end of a queue is gone
    #[error("Channel {connector} is disconnected")]
    Disconnected { connector: String },

    /// Every dispatcher output has been dropped
    #[error("All dispatcher outputs are closed")]
    AllOutputsClosed,

    // ========== Codec Errors ==========

    /// Message could not be encoded
    #[error("Encode failed: {reason}")]
    Encode { reason: String },

    /// Message could not be decoded
    #[error("Decode failed: {reason}")]
    Decode { reason: String },

    // ========== Control Errors ==========

    /// Worker did not answer within the control timeout
    #[error("Worker {worker} did not answer {token} within {timeout_ms}ms")]
    ControlTimeout {
        worker: String,
        token: String,
        timeout_ms: u64,
    },

    // ========== Runtime Errors ==========

    /// Shutdown in progress
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// I/O failure outside a connector
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MeshError {
    /// Returns true if the operation must not be started at all
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MeshError::EmptyDispatch { .. }
                | MeshError::UnregisteredPayload { .. }
                | MeshError::Config(_)
                | MeshError::UnknownPort { .. }
        )
    }

    /// Returns true if the affected connector should be treated as unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MeshError::ResolveFailed { .. }
                | MeshError::BindFailed { .. }
                | MeshError::DialFailed { .. }
                | MeshError::Disconnected { .. }
        )
    }
}

/// Topology loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Node {0} is not declared in the topology")]
    UnknownNode(String),

    #[error("Connection {alias} on worker {worker}: {reason}")]
    InvalidConnection {
        worker: String,
        alias: String,
        reason: String,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

/// Result type alias for Meshwork operations
pub type Result<T> = std::result::Result<T, MeshError>;
