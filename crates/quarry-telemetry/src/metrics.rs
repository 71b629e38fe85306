use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// In-memory counter. Monotonically increasing.
#[derive(Debug, Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory histogram. Stores all observations for percentile computation.
#[derive(Debug, Default)]
struct Histogram {
    observations: Mutex<Vec<f64>>,
}

impl Histogram {
    fn observe(&self, value: f64) {
        self.observations.lock().push(value);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let count = obs.len();
        let sum: f64 = obs.iter().sum();
        let p50 = obs[count / 2];
        let p95 = obs[(count as f64 * 0.95) as usize];
        let p99 = obs[((count as f64 * 0.99) as usize).min(count - 1)];
        HistogramSummary {
            count: count as u64,
            sum,
            p50,
            p95,
            p99,
        }
    }
}

/// Summary statistics from a histogram.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Process-wide counters for query streams.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    frames: RwLock<HashMap<String, Counter>>,
    chunks_coalesced: Counter,
    flushes: Counter,
    parse_cycles: Counter,
    queries_completed: Counter,
    queries_failed: Counter,
    first_frame_ms: Histogram,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub frames: BTreeMap<String, u64>,
    pub chunks_coalesced: u64,
    pub flushes: u64,
    pub parse_cycles: u64,
    pub queries_completed: u64,
    pub queries_failed: u64,
    pub first_frame_ms: HistogramSummary,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, frame_type: &str) {
        {
            let frames = self.frames.read();
            if let Some(counter) = frames.get(frame_type) {
                counter.increment(1);
                return;
            }
        }
        self.frames
            .write()
            .entry(frame_type.to_string())
            .or_default()
            .increment(1);
    }

    /// One coalescer flush that merged `chunks` pending chunks.
    pub fn record_flush(&self, chunks: usize) {
        self.flushes.increment(1);
        self.chunks_coalesced.increment(chunks as u64);
    }

    pub fn record_parse_cycle(&self) {
        self.parse_cycles.increment(1);
    }

    pub fn record_completed(&self) {
        self.queries_completed.increment(1);
    }

    pub fn record_failed(&self) {
        self.queries_failed.increment(1);
    }

    /// Latency between sending a query and its first inbound frame.
    pub fn observe_first_frame(&self, elapsed: Duration) {
        self.first_frame_ms.observe(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        let frames = self
            .frames
            .read()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect();
        StreamMetricsSnapshot {
            taken_at: Utc::now(),
            frames,
            chunks_coalesced: self.chunks_coalesced.get(),
            flushes: self.flushes.get(),
            parse_cycles: self.parse_cycles.get(),
            queries_completed: self.queries_completed.get(),
            queries_failed: self.queries_failed.get(),
            first_frame_ms: self.first_frame_ms.summary(),
        }
    }
}
