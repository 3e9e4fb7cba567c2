//! Prometheus metrics for the node
//!
//! Process-wide atomics rendered in the Prometheus text format on the
//! leader's `/prometheus` route.

use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Upper bounds, in seconds, of the control round-trip buckets. The last one
/// is the default control timeout.
const ROUNDTRIP_BOUNDS: [f64; 10] = [0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0];

/// Name, help text and type line shared by every metric
struct Family {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
}

impl Family {
    fn header(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind);
    }
}

/// Something that writes itself into an exposition
pub trait Render {
    fn render(&self, out: &mut String);
}

/// Monotonic count
pub struct Counter {
    family: Family,
    value: AtomicU64,
}

impl Counter {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            family: Family { name, help, kind: "counter" },
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Render for Counter {
    fn render(&self, out: &mut String) {
        self.family.header(out);
        let _ = writeln!(out, "{} {}", self.family.name, self.get());
    }
}

/// Last value set
pub struct Gauge {
    family: Family,
    value: AtomicI64,
}

impl Gauge {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            family: Family { name, help, kind: "gauge" },
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Render for Gauge {
    fn render(&self, out: &mut String) {
        self.family.header(out);
        let _ = writeln!(out, "{} {}", self.family.name, self.get());
    }
}

/// Latency distribution over [`ROUNDTRIP_BOUNDS`]
pub struct Histogram {
    family: Family,
    /// Non-cumulative hits per bound; anything above the last bound lands in none
    hits: [AtomicU64; ROUNDTRIP_BOUNDS.len()],
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    const fn new(name: &'static str, help: &'static str) -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            family: Family { name, help, kind: "histogram" },
            hits: [ZERO; ROUNDTRIP_BOUNDS.len()],
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a duration in seconds
    pub fn observe(&self, seconds: f64) {
        if let Some(slot) = ROUNDTRIP_BOUNDS.iter().position(|bound| seconds <= *bound) {
            self.hits[slot].fetch_add(1, Ordering::Relaxed);
        }
        self.sum_micros.fetch_add((seconds * 1e6) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Render for Histogram {
    fn render(&self, out: &mut String) {
        let name = self.family.name;
        self.family.header(out);

        // Buckets are cumulative on the wire
        let mut cumulative = 0;
        for (bound, hits) in ROUNDTRIP_BOUNDS.iter().zip(&self.hits) {
            cumulative += hits.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, cumulative);
        }

        // Sampled once so +Inf and _count agree
        let count = self.count().max(cumulative);
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, count);
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6;
        let _ = writeln!(out, "{}_sum {}", name, sum);
        let _ = writeln!(out, "{}_count {}", name, count);
    }
}

/// Standard node metrics
pub mod standard {
    use super::{Counter, Gauge, Histogram};

    pub static DISPATCHED_MESSAGES: Counter =
        Counter::new("meshwork_dispatched_messages_total", "Messages delivered by dispatchers");

    pub static DROPPED_MESSAGES: Counter =
        Counter::new("meshwork_dropped_messages_total", "Messages no dispatcher output accepted");

    pub static CODEC_ERRORS: Counter =
        Counter::new("meshwork_codec_errors_total", "Datagrams that failed to encode or decode");

    pub static CONTROL_TIMEOUTS: Counter = Counter::new(
        "meshwork_control_timeouts_total",
        "Control requests a worker did not answer in time",
    );

    pub static RUNNING_WORKERS: Gauge =
        Gauge::new("meshwork_running_workers", "Workers the leader believes are running");

    pub static CONTROL_ROUNDTRIP: Histogram =
        Histogram::new("meshwork_control_roundtrip_seconds", "Leader to worker control latency");
}

/// Exposition of every standard metric
pub fn gather_node_metrics() -> String {
    let all: [&dyn Render; 6] = [
        &standard::DISPATCHED_MESSAGES,
        &standard::DROPPED_MESSAGES,
        &standard::CODEC_ERRORS,
        &standard::CONTROL_TIMEOUTS,
        &standard::RUNNING_WORKERS,
        &standard::CONTROL_ROUNDTRIP,
    ];

    let mut out = String::new();
    for metric in all {
        metric.render(&mut out);
    }
    out
}
