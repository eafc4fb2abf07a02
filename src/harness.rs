//! One benchmark run, end to end.
//!
//! [`Bench`] wires the pieces together: optional warm-start build, the
//! producer, the consumer pool under the configured consistency discipline,
//! a once-per-second progress reporter, and the post-run recall check.
//!
//! # Example
//!
//! ```ignore
//! use ann_cc_bench::prelude::*;
//!
//! let config = BenchConfig::load("bench.json")?;
//! let base = Arc::new(VectorSet::load_bin(&config.data.data_path)?);
//! let queries = Arc::new(VectorSet::load_bin(&config.data.query_path)?);
//! let index = create_index(&config, base.dimensions())?;
//!
//! let bench = Bench::new(config, index, base, queries)?;
//! let outcome = bench.run().await?;
//! println!("insert qps: {:.2}", outcome.summary.insert.qps);
//! ```

use crate::cancel::{CancelHandle, CancelToken, cancellation};
use crate::config::BenchConfig;
use crate::consistency::discipline_for;
use crate::consumer::{ConsumerPool, PoolReport, ResultStore};
use crate::dataset::VectorSet;
use crate::error::{BenchError, BenchResult};
use crate::index::{AnnIndex, FlatIndex, HnswConfig, HnswIndex};
use crate::producer::{Producer, ProducerReport, WorkloadPlan};
use crate::queue::TaskQueue;
use crate::rate_limiter::RateLimiter;
use crate::recall::RecallValidator;
use crate::stats::{RunSummary, StatsAccumulator};
use crate::task::SearchResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct BenchOutcome {
    pub summary: RunSummary,
    pub producer: ProducerReport,
    pub pool: PoolReport,
    /// Points bulk-loaded before the timed run
    pub prebuilt: usize,
    /// Retained search results (empty under summary-only retention)
    pub results: Vec<SearchResult>,
    /// Search results produced, retained or not
    pub result_count: u64,
    /// Recall percentage; `None` when skipped or failed
    pub recall: Option<f64>,
}

/// Build the index named by `config.index.index_type`.
pub fn create_index(config: &BenchConfig, dimensions: usize) -> BenchResult<Arc<dyn AnnIndex>> {
    match config.index.index_type.as_str() {
        "hnsw" => {
            let hnsw = HnswConfig::with_m(config.index.m)
                .ef_construction(config.index.ef_construction)
                .ef_search(config.search.ef_search as usize)
                .max_elements(config.data.max_elements);
            Ok(Arc::new(HnswIndex::new(dimensions, hnsw)))
        }
        "flat" => Ok(Arc::new(FlatIndex::new(dimensions))),
        other => Err(BenchError::Config(format!("unsupported index type '{}'", other))),
    }
}

/// A configured benchmark run.
pub struct Bench {
    config: BenchConfig,
    index: Arc<dyn AnnIndex>,
    base: Arc<VectorSet>,
    queries: Arc<VectorSet>,
    cancel: CancelHandle,
    progress_interval: Duration,
}

impl Bench {
    /// Validate `config` against the index and datasets.
    pub fn new(
        config: BenchConfig,
        index: Arc<dyn AnnIndex>,
        base: Arc<VectorSet>,
        queries: Arc<VectorSet>,
    ) -> BenchResult<Self> {
        config.validate()?;
        for (name, set) in [("base", &base), ("query", &queries)] {
            if !set.is_empty() && set.dimensions() != index.dimensions() {
                return Err(BenchError::Config(format!(
                    "{} vectors have dimension {} but the index expects {}",
                    name,
                    set.dimensions(),
                    index.dimensions()
                )));
            }
        }

        let (cancel, _) = cancellation();
        Ok(Self {
            config,
            index,
            base,
            queries,
            cancel,
            progress_interval: Duration::from_secs(1),
        })
    }

    /// Change how often progress is logged.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Handle that cancels this run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn AnnIndex> {
        &self.index
    }

    /// Bulk-load the first `begin_num` points. Returns the number loaded.
    ///
    /// A failed build is logged and the run continues on whatever the index holds.
    pub async fn prebuild(&self) -> BenchResult<usize> {
        let count = self
            .config
            .data
            .begin_num
            .min(self.config.data.max_elements)
            .min(self.base.len());
        if count == 0 {
            return Ok(0);
        }

        let index = self.index.clone();
        let base = self.base.clone();
        let started = Instant::now();
        let built = tokio::task::spawn_blocking(move || {
            let tags: Vec<u32> = (0..count as u32).collect();
            index.build(&base.points()[..count], &tags)
        })
        .await?;

        match built {
            Ok(()) => {
                tracing::info!(points = count, elapsed_ms = started.elapsed().as_millis() as u64, "Pre-built index");
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(points = count, error = %e, "Pre-build failed");
                Ok(0)
            }
        }
    }

    /// Execute the run. Only pipeline protocol violations and join failures
    /// are returned as errors.
    pub async fn run(&self) -> BenchResult<BenchOutcome> {
        let config = &self.config;
        let plan = WorkloadPlan::new(config, self.base.len(), self.queries.len());
        let prebuilt = self.prebuild().await?;
        self.index.set_query_params(config.search.query_params());

        let threads = config.workload.effective_threads();
        let queue = Arc::new(TaskQueue::new(config.workload.queue_size));
        let limiter = Arc::new(RateLimiter::from_rate(config.workload.aggregate_rate()));
        let stats = Arc::new(StatsAccumulator::new());
        let results = Arc::new(ResultStore::new(config.workload.result_retention));
        let pool = ConsumerPool::new(
            threads,
            self.index.clone(),
            discipline_for(config.workload.consistency),
            stats.clone(),
            results.clone(),
        )
        .with_distances(config.workload.record_distances);

        tracing::info!(
            index = self.index.name(),
            threads,
            batch_size = plan.batch_size,
            search_points = plan.search_points(),
            insert_batches = plan.insert_batches(),
            consistency = %config.workload.consistency,
            rate = ?limiter.rate(),
            "Starting benchmark"
        );

        let total = plan.end.saturating_sub(plan.begin) as u64;
        let producer = Producer::new(
            plan,
            self.base.clone(),
            self.queries.clone(),
            queue.clone(),
            limiter,
            self.cancel.token(),
        );

        let (finished, finished_token) = cancellation();
        let progress = tokio::spawn(report_progress(
            stats.clone(),
            total,
            self.progress_interval,
            finished_token,
        ));

        let started = Instant::now();
        let producer = tokio::spawn(producer.run());
        let pool_report = pool.run(queue).await;
        let elapsed = started.elapsed();

        finished.cancel();
        if let Err(e) = progress.await {
            tracing::debug!(error = %e, "Progress reporter ended abnormally");
        }

        let producer_report = producer.await??;
        let pool_report = pool_report?;
        let summary = stats.summarize(elapsed);
        let recall = self.validate_recall().await;

        Ok(BenchOutcome {
            summary,
            producer: producer_report,
            pool: pool_report,
            prebuilt,
            results: results.take(),
            result_count: results.count(),
            recall,
        })
    }

    async fn validate_recall(&self) -> Option<f64> {
        let Some(validator) = RecallValidator::from_config(&self.config) else {
            tracing::info!("Recall validation not configured, skipping");
            return None;
        };
        match validator.validate(self.index.clone(), self.queries.clone()).await {
            Ok(recall) => {
                tracing::info!(recall, recall_at = validator.recall_at, "Recall validated");
                Some(recall)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Recall validation failed");
                None
            }
        }
    }
}

/// Log insert progress and per-interval throughput until `finished` fires.
async fn report_progress(
    stats: Arc<StatsAccumulator>,
    total: u64,
    interval: Duration,
    finished: CancelToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut last = (stats.inserted_points(), stats.searched_points(), Instant::now());
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = finished.cancelled() => break,
        }

        let (inserted, searched, now) = (stats.inserted_points(), stats.searched_points(), Instant::now());
        let secs = now.duration_since(last.2).as_secs_f64().max(f64::EPSILON);
        let percent = if total > 0 {
            inserted as f64 * 100.0 / total as f64
        } else {
            100.0
        };
        tracing::info!(
            inserted,
            total,
            percent = %format!("{:.1}", percent),
            insert_qps = ((inserted - last.0) as f64 / secs).round() as u64,
            search_qps = ((searched - last.1) as f64 / secs).round() as u64,
            "Progress"
        );
        last = (inserted, searched, now);
    }
}
