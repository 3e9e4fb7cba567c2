//! Worker state machine
//!
//! Tracks the local phase of a worker and its lifetime counters. This is
//! what a worker reports on METRICS; the leader keeps its own view in the cache.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::dispatch::DispatchStats;

/// Worker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerPhase {
    /// Created or re-initialized, not yet running
    Initializing,
    /// Serving messages and control tokens
    Running,
    /// STOP received, releasing ports
    Stopping,
    /// Run returned normally
    Stopped,
    /// Run returned with an error
    Failed,
}

/// Report sent in reply to METRICS
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub phase: WorkerPhase,
    pub runs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub received: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Local worker state
pub struct WorkerState {
    /// Current phase
    phase: RwLock<WorkerPhase>,
    /// When the current run began
    started_at: RwLock<Option<DateTime<Utc>>>,
    /// Number of runs started
    runs: AtomicU64,
    /// Counts folded in from finished runs
    received: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerState {
    /// Create new worker state
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(WorkerPhase::Initializing),
            started_at: RwLock::new(None),
            runs: AtomicU64::new(0),
            received: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Get current phase
    pub fn phase(&self) -> WorkerPhase {
        *self.phase.read()
    }

    /// Set phase
    pub fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write() = phase;
    }

    /// Back to Initializing; lifetime counters are kept
    pub fn reset(&self) {
        self.set_phase(WorkerPhase::Initializing);
        *self.started_at.write() = None;
    }

    /// Mark the start of a run
    pub fn begin_run(&self) -> u64 {
        *self.started_at.write() = Some(Utc::now());
        self.set_phase(WorkerPhase::Running);
        self.runs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of runs started so far
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Add a finished dispatcher's counts to the lifetime totals
    pub fn absorb(&self, stats: DispatchStats) {
        self.received.fetch_add(stats.received, Ordering::Relaxed);
        self.delivered.fetch_add(stats.delivered, Ordering::Relaxed);
        self.dropped.fetch_add(stats.dropped, Ordering::Relaxed);
    }

    /// Snapshot including the counts of a dispatcher still running
    pub fn report(&self, live: DispatchStats) -> WorkerReport {
        WorkerReport {
            phase: self.phase(),
            runs: self.runs(),
            started_at: *self.started_at.read(),
            received: self.received.load(Ordering::Relaxed) + live.received,
            delivered: self.delivered.load(Ordering::Relaxed) + live.delivered,
            dropped: self.dropped.load(Ordering::Relaxed) + live.dropped,
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}
