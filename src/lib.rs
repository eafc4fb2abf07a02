//! # ann-cc-bench: Concurrent Insert/Search Benchmarks for ANN Indexes
//!
//! A workload generator that drives mixed insert and search traffic against
//! a mutable nearest-neighbor index, measures latency and throughput under
//! real contention, and optionally validates recall against ground truth.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ann_cc_bench::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = BenchConfig::default();
//!     config.workload.write_ratio = 0.5;
//!     config.workload.num_threads = 8;
//!
//!     let base = Arc::new(VectorSet::synthetic(100_000, 128, 1));
//!     let queries = Arc::new(VectorSet::synthetic(1_000, 128, 2));
//!     let index = create_index(&config, 128)?;
//!
//!     let outcome = Bench::new(config, index, base, queries)?.run().await?;
//!     println!("insert p99: {:.2}ms", outcome.summary.insert.p99_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Producer --(RateLimiter)--> TaskQueue --> ConsumerPool --> AnnIndex
//!                                              |
//!                                              +--> StatsAccumulator, ResultStore
//! ```
//!
//! - [`producer`]: partitions the dataset into insert batches and interleaves
//!   search batches according to the write ratio
//! - [`queue`]: bounded FIFO providing backpressure
//! - [`consumer`]: workers executing tasks under a
//!   [`consistency`] discipline (enforced single-writer or relaxed)
//! - [`stats`]: latency samples, percentiles and QPS
//! - [`recall`]: post-run recall validation through an external scorer
//!
//! The index itself is a collaborator behind the [`index::AnnIndex`] trait;
//! an HNSW graph and an exact flat index ship with the crate.

pub mod cancel;
pub mod config;
pub mod consistency;
pub mod consumer;
pub mod dataset;
pub mod error;
pub mod harness;
pub mod index;
pub mod producer;
pub mod queue;
pub mod rate_limiter;
pub mod recall;
pub mod report;
pub mod stats;
pub mod task;

pub use config::BenchConfig;
pub use error::{BenchError, BenchResult, IndexError};
pub use harness::{Bench, BenchOutcome, create_index};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ann_cc_bench::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelToken, cancellation};
    pub use crate::config::{
        BenchConfig, ConsistencyMode, DataConfig, IndexConfig, ResultConfig, ResultRetention,
        SearchConfig, WorkloadConfig,
    };
    pub use crate::consistency::{ConsistencyDiscipline, discipline_for};
    pub use crate::consumer::{ConsumerPool, ResultStore};
    pub use crate::dataset::VectorSet;
    pub use crate::error::{BenchError, BenchResult, IndexError};
    pub use crate::harness::{Bench, BenchOutcome, create_index};
    pub use crate::index::{AnnIndex, FlatIndex, HnswConfig, HnswIndex, Neighbor, Point, QueryParams};
    pub use crate::producer::{Producer, WorkloadPlan};
    pub use crate::queue::TaskQueue;
    pub use crate::rate_limiter::RateLimiter;
    pub use crate::stats::{LatencySummary, RunSummary, StatsAccumulator};
    pub use crate::task::{SearchParams, SearchResult, Task, TaskKind};
    pub use std::sync::Arc;
}
