//! Leader-side view of every worker
//!
//! Entries are seeded at init and never removed. Every mutation refreshes the
//! entry's timestamp, which never moves backwards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Last known health of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Run state of a worker as the leader sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Initialized,
    Running,
    Stopped,
    Unknown,
}

impl RunState {
    /// Allowed transitions of the per-worker state machine
    pub fn can_become(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Initialized, Running)
                | (Running, Stopped)
                | (Running, Unknown)
                // A later successful round-trip resolves Unknown
                | (Unknown, Running)
                | (Unknown, Stopped)
                // Start re-initializes stopped workers
                | (Stopped, Initialized)
        )
    }
}

/// Cached state of one worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerCacheEntry {
    pub timestamp: DateTime<Utc>,
    pub metric: Option<Value>,
    pub status: String,
    pub health: Health,
    pub state: RunState,
}

impl WorkerCacheEntry {
    fn seeded() -> Self {
        Self {
            timestamp: Utc::now(),
            metric: None,
            status: "Unknown".into(),
            health: Health::Unknown,
            state: RunState::Initialized,
        }
    }

    fn touch(&mut self) {
        self.timestamp = self.timestamp.max(Utc::now());
    }
}

/// Worker name → cached state
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cache {
    workers: BTreeMap<String, WorkerCacheEntry>,
}

impl Cache {
    /// One fresh entry per worker
    pub fn seed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workers = names
            .into_iter()
            .map(|name| (name.into(), WorkerCacheEntry::seeded()))
            .collect();
        Self { workers }
    }

    pub fn get(&self, name: &str) -> Option<&WorkerCacheEntry> {
        self.workers.get(name)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WorkerCacheEntry)> {
        self.workers.iter()
    }

    /// Move a worker to `next` if the state machine allows it.
    ///
    /// Returns whether the state changed. The timestamp is refreshed either way.
    pub fn transition(&mut self, name: &str, next: RunState) -> bool {
        let Some(entry) = self.workers.get_mut(name) else {
            return false;
        };
        entry.touch();
        if entry.state == next {
            return false;
        }
        if !entry.state.can_become(next) {
            debug!("Cache: {} cannot go from {:?} to {:?}", name, entry.state, next);
            return false;
        }
        entry.state = next;
        true
    }

    pub fn set_health(&mut self, name: &str, health: Health) {
        if let Some(entry) = self.workers.get_mut(name) {
            entry.health = health;
            entry.touch();
        }
    }

    pub fn set_status(&mut self, name: &str, status: impl Into<String>) {
        if let Some(entry) = self.workers.get_mut(name) {
            entry.status = status.into();
            entry.touch();
        }
    }

    pub fn set_metric(&mut self, name: &str, metric: Value) {
        if let Some(entry) = self.workers.get_mut(name) {
            entry.metric = Some(metric);
            entry.touch();
        }
    }

    /// True when there is at least one worker and every worker is Stopped
    pub fn all_stopped(&self) -> bool {
        !self.workers.is_empty() && self.workers.values().all(|e| e.state == RunState::Stopped)
    }

    pub fn count(&self, state: RunState) -> usize {
        self.workers.values().filter(|e| e.state == state).count()
    }
}
