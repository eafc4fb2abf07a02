//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use ann_cc_bench::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// One call observed by [`RecordingIndex`].
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: TaskKind,
    /// Insert tags, or the base offsets a search queried for
    pub tags: Vec<u32>,
    /// Number of tags committed when the call started
    pub committed_before: usize,
    /// Tags of this call that were not committed when it started
    pub uncommitted: Vec<u32>,
    pub start: Instant,
    pub end: Instant,
}

impl Call {
    pub fn overlaps(&self, other: &Call) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Mock index that records every call and its time window.
///
/// It is deliberately not safe for concurrent mutation in any useful sense:
/// it only counts how many calls are in flight so tests can observe overlap.
pub struct RecordingIndex {
    dim: usize,
    delay: Duration,
    reject_every: Option<usize>,
    /// Base vector bits -> dataset offset, to name search queries
    base: HashMap<Vec<u32>, u32>,
    committed: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<Call>>,
    insert_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            delay: Duration::ZERO,
            reject_every: None,
            base: HashMap::new(),
            committed: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            insert_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every insert and search call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every `n`-th batch insert.
    pub fn rejecting_every(mut self, n: usize) -> Self {
        self.reject_every = Some(n.max(1));
        self
    }

    /// Resolve search vectors that come from `base` to their offsets.
    pub fn with_base(mut self, base: &VectorSet) -> Self {
        self.base = base
            .points()
            .iter()
            .enumerate()
            .map(|(offset, p)| (bits(p), offset as u32))
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: TaskKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn observe<T>(&self, kind: TaskKind, tags: Vec<u32>, body: impl FnOnce() -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let (committed_before, uncommitted) = {
            let committed = self.committed.lock().unwrap();
            let missing = tags.iter().copied().filter(|t| !committed.contains(t)).collect();
            (committed.len(), missing)
        };

        let start = Instant::now();
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let out = body();
        let end = Instant::now();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            kind,
            tags,
            committed_before,
            uncommitted,
            start,
            end,
        });
        out
    }
}

impl AnnIndex for RecordingIndex {
    fn name(&self) -> &str {
        "recording"
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    fn insert(&self, _vector: &[f32], tag: u32) -> Result<(), IndexError> {
        self.committed.lock().unwrap().insert(tag);
        Ok(())
    }

    fn batch_insert(&self, vectors: &[Point], tags: &[u32]) -> Result<(), IndexError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reject = self.reject_every.is_some_and(|n| call % n == 0);
        self.observe(TaskKind::Insert, tags.to_vec(), || {
            if reject {
                return Err(IndexError::Rejected(format!("batch {} refused", call)));
            }
            for (vector, &tag) in vectors.iter().zip(tags) {
                self.insert(vector, tag)?;
            }
            Ok(())
        })
    }

    fn set_query_params(&self, _params: QueryParams) {}

    fn search(&self, _query: &[f32], k: usize, _params: &QueryParams) -> Result<Vec<Neighbor>, IndexError> {
        let committed = self.committed.lock().unwrap();
        let mut tags: Vec<u32> = committed.iter().copied().collect();
        tags.sort_unstable();
        Ok(tags
            .into_iter()
            .take(k)
            .map(|tag| Neighbor { tag, distance: tag as f32 })
            .collect())
    }

    fn batch_search(
        &self,
        queries: &[Point],
        k: usize,
        params: &QueryParams,
    ) -> Result<Vec<Vec<Neighbor>>, IndexError> {
        let tags = queries
            .iter()
            .filter_map(|q| self.base.get(&bits(q)).copied())
            .collect();
        self.observe(TaskKind::Search, tags, || {
            queries.iter().map(|q| self.search(q, k, params)).collect()
        })
    }
}

fn bits(vector: &[f32]) -> Vec<u32> {
    vector.iter().map(|x| x.to_bits()).collect()
}

/// A small flat-index workload: `points` base vectors of dimension 8.
pub fn config(points: usize, batch: usize, ratio: f64, threads: usize) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.index.index_type = "flat".into();
    config.data.max_elements = points;
    config.data.write_batch_size = batch;
    config.workload.write_ratio = ratio;
    config.workload.num_threads = threads;
    config.workload.queue_size = 16;
    config.search.recall_at = 5;
    config
}

pub fn datasets(points: usize, queries: usize) -> (Arc<VectorSet>, Arc<VectorSet>) {
    (
        Arc::new(VectorSet::synthetic(points, 8, 11)),
        Arc::new(VectorSet::synthetic(queries, 8, 12)),
    )
}
