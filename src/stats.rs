//! Thread-safe latency and throughput accounting.
//!
//! Workers record every completed operation; once the pool has drained,
//! [`StatsAccumulator::summarize`] turns the raw samples into mean, tail
//! percentiles and QPS. Inserts and searches are recorded under separate
//! locks so the two kinds never contend with each other.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters and samples for one operation kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpStats {
    /// Completed operations (batches)
    pub ops: u64,
    /// Points covered by those operations
    pub points: u64,
    /// Per-operation latency in milliseconds, in completion order
    pub latencies_ms: Vec<f64>,
}

impl OpStats {
    fn record(&mut self, latency: Duration, points: usize) {
        self.ops += 1;
        self.points += points as u64;
        self.latencies_ms.push(latency.as_secs_f64() * 1000.0);
    }
}

/// Copy of everything recorded so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub insert: OpStats,
    pub search: OpStats,
}

/// Derived metrics for one operation kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub ops: u64,
    pub points: u64,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Points per second over the whole run
    pub qps: f64,
}

impl LatencySummary {
    /// Summarize `stats` over a run lasting `elapsed_secs`.
    pub fn from_stats(stats: &OpStats, elapsed_secs: f64) -> Self {
        let mut sorted = stats.latencies_ms.clone();
        sorted.sort_by(f64::total_cmp);

        let qps = if elapsed_secs > 0.0 {
            stats.points as f64 / elapsed_secs
        } else {
            0.0
        };

        Self {
            ops: stats.ops,
            points: stats.points,
            mean_ms: mean(&sorted),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
            qps,
        }
    }
}

/// Final metrics of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub elapsed_secs: f64,
    pub insert: LatencySummary,
    pub search: LatencySummary,
}

/// Shared accumulator handed to every worker.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    insert: Mutex<OpStats>,
    search: Mutex<OpStats>,
    // Lock-free mirrors of the point counters, for progress and snapshots
    inserted_points: AtomicU64,
    searched_points: AtomicU64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed insert batch.
    pub fn record_insert(&self, latency: Duration, points: usize) {
        self.insert
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(latency, points);
        self.inserted_points
            .fetch_add(points as u64, Ordering::AcqRel);
    }

    /// Record one completed search batch.
    pub fn record_search(&self, latency: Duration, points: usize) {
        self.search
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(latency, points);
        self.searched_points
            .fetch_add(points as u64, Ordering::AcqRel);
    }

    /// Points inserted so far.
    pub fn inserted_points(&self) -> u64 {
        self.inserted_points.load(Ordering::Acquire)
    }

    /// Query points searched so far.
    pub fn searched_points(&self) -> u64 {
        self.searched_points.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> RunStats {
        RunStats {
            insert: self
                .insert
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            search: self
                .search
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }

    /// Derive the run summary. Call after every worker has joined.
    pub fn summarize(&self, elapsed: Duration) -> RunSummary {
        let stats = self.snapshot();
        let elapsed_secs = elapsed.as_secs_f64();
        RunSummary {
            elapsed_secs,
            insert: LatencySummary::from_stats(&stats.insert, elapsed_secs),
            search: LatencySummary::from_stats(&stats.search, elapsed_secs),
        }
    }
}

/// Value at index `floor(p · (n − 1))` of an ascending list; 0 when empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let idx = (p * (sorted.len() - 1) as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Arithmetic mean; 0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
