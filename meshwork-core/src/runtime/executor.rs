//! Tokio runtime executor configuration
//!
//! Connector transports, the control surface and control round-trips run on
//! the I/O runtime; worker bodies run on the compute runtime so a busy worker
//! cannot stall a control timeout.

use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use crate::error::{MeshError, Result};

/// Configuration for the node runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of threads for transports and control
    pub io_threads: usize,
    /// Number of threads for worker bodies
    pub compute_threads: usize,
    /// How long in-flight I/O gets on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: (cpus / 2).max(2),
            compute_threads: cpus.max(2),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Dual-runtime executor for a node
pub struct NodeRuntime {
    /// Transports, HTTP and control
    io_runtime: Runtime,
    /// Worker bodies
    compute_runtime: Runtime,
    /// Shared configuration
    config: RuntimeConfig,
}

impl NodeRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("meshwork-io")
            .enable_all()
            .build()
            .map_err(|e| MeshError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let compute_runtime = Builder::new_multi_thread()
            .worker_threads(config.compute_threads)
            .thread_name("meshwork-worker")
            .enable_all()
            .build()
            .map_err(|e| MeshError::Internal {
                message: format!("Failed to create compute runtime: {}", e),
            })?;

        Ok(Self {
            io_runtime,
            compute_runtime,
            config,
        })
    }

    /// Run a future on the I/O runtime, blocking until complete
    pub fn block_on_io<F: std::future::Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Handle for spawning worker bodies
    pub fn compute_handle(&self) -> tokio::runtime::Handle {
        self.compute_runtime.handle().clone()
    }

    /// Shut down both runtimes. Workers are dropped without a grace period.
    pub fn shutdown(self) {
        self.compute_runtime.shutdown_background();
        self.io_runtime.shutdown_timeout(self.config.shutdown_timeout);
    }
}
