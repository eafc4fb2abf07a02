//! The producer: turns a dataset into a rate-limited stream of tasks.
//!
//! Insert batches walk the dataset from `begin_num` in order; after every
//! insert batch one search batch is emitted, sized so that inserts make up
//! `write_ratio` of all submitted points. The queue is always closed when the
//! producer finishes, including on cancellation, error or panic.

use crate::cancel::CancelToken;
use crate::config::BenchConfig;
use crate::dataset::VectorSet;
use crate::error::{BenchError, BenchResult};
use crate::queue::TaskQueue;
use crate::rate_limiter::RateLimiter;
use crate::task::{SearchParams, Task, TaskKind};
use std::ops::Range;
use std::sync::Arc;

/// Where search batches take their queries from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    /// Round-robin over the first `count` vectors of the query set
    QuerySet { count: usize },
    /// The most recently inserted points
    NewData,
    /// No searches
    Disabled,
}

/// Deterministic description of one run's task stream.
///
/// Search points are allotted against the running insert total rather than
/// per batch, so fractional shares carry over: after `n` inserted points
/// exactly `floor(n · (1/write_ratio − 1))` query points have been emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadPlan {
    /// First dataset offset inserted by the timed run
    pub begin: usize,
    /// One past the last dataset offset inserted
    pub end: usize,
    pub batch_size: usize,
    /// Query points owed per inserted point, `1/write_ratio − 1`
    pub search_factor: f64,
    pub queries: QuerySource,
    pub search: SearchParams,
}

impl WorkloadPlan {
    /// Derive the plan from configuration and the loaded dataset sizes.
    pub fn new(config: &BenchConfig, base_len: usize, query_len: usize) -> Self {
        let batch_size = config.data.write_batch_size.max(1);
        let begin = config.data.begin_num;
        let end = base_len.min(config.data.max_elements);
        let search_factor = Self::search_factor(config.workload.write_ratio);

        let mut plan = Self {
            begin,
            end,
            batch_size,
            search_factor,
            queries: QuerySource::Disabled,
            search: SearchParams {
                recall_at: config.search.recall_at,
                query: config.search.query_params(),
            },
        };

        plan.queries = if plan.search_points() == 0 {
            QuerySource::Disabled
        } else if config.workload.query_new_data {
            QuerySource::NewData
        } else {
            match query_len.min(config.data.max_queries) {
                0 => {
                    tracing::warn!("No queries available, search batches disabled");
                    QuerySource::Disabled
                }
                count => QuerySource::QuerySet { count },
            }
        };
        plan
    }

    /// `1/ratio − 1`, or 0 when `ratio` is not in `(0, 1)`.
    pub fn search_factor(write_ratio: f64) -> f64 {
        if write_ratio > 0.0 && write_ratio < 1.0 {
            1.0 / write_ratio - 1.0
        } else {
            0.0
        }
    }

    /// Query points owed once `inserted` points of the timed run have been emitted.
    pub fn searches_through(&self, inserted: usize) -> usize {
        // Absorb representation error so 0.5 -> exactly 1x
        (inserted as f64 * self.search_factor + 1e-9).floor() as usize
    }

    /// Size of the search batch following the insert batch `range`.
    pub fn search_len(&self, range: &Range<usize>) -> usize {
        if self.queries == QuerySource::Disabled {
            return 0;
        }
        let before = range.start.saturating_sub(self.begin);
        let after = range.end.saturating_sub(self.begin);
        self.searches_through(after) - self.searches_through(before)
    }

    /// True when the timed run has nothing to insert.
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Points inserted by the timed run.
    pub fn insert_points(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    /// Query points the whole run owes.
    pub fn search_points(&self) -> usize {
        self.searches_through(self.insert_points())
    }

    /// Dataset ranges of the insert batches, in order.
    pub fn insert_ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        (self.begin..self.end)
            .step_by(self.batch_size)
            .map(move |start| start..(start + self.batch_size).min(self.end))
    }

    pub fn insert_batches(&self) -> usize {
        self.insert_points().div_ceil(self.batch_size)
    }

    /// Search batches emitted when the run is not cancelled.
    pub fn search_batches(&self) -> usize {
        self.insert_ranges()
            .filter(|range| self.search_len(range) > 0)
            .count()
    }

    /// `len` offsets queried right after an insert batch ending (exclusive) at `end`.
    ///
    /// The window reaches back `len` points; offsets before the start of the
    /// dataset clamp to 0.
    pub fn new_data_offsets(&self, end: usize, len: usize) -> impl Iterator<Item = usize> {
        let end = end as i64;
        let start = end - len as i64;
        (start..end).map(|o| o.max(0) as usize)
    }
}

/// What the producer actually emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub insert_batches: usize,
    pub search_batches: usize,
    pub insert_points: usize,
    pub search_points: usize,
    /// Batches built but abandoned because of cancellation
    pub skipped_batches: usize,
    pub cancelled: bool,
}

/// Closes the queue if the producer unwinds before closing it itself.
struct CloseOnDrop {
    queue: Arc<TaskQueue>,
    armed: bool,
}

impl CloseOnDrop {
    fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue, armed: true }
    }

    fn close(mut self) -> BenchResult<()> {
        self.armed = false;
        self.queue.close()
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.armed && !self.queue.is_closed() {
            let _ = self.queue.close();
        }
    }
}

/// Single producer actor.
pub struct Producer {
    plan: WorkloadPlan,
    base: Arc<VectorSet>,
    queries: Arc<VectorSet>,
    queue: Arc<TaskQueue>,
    limiter: Arc<RateLimiter>,
    cancel: CancelToken,
}

impl Producer {
    pub fn new(
        plan: WorkloadPlan,
        base: Arc<VectorSet>,
        queries: Arc<VectorSet>,
        queue: Arc<TaskQueue>,
        limiter: Arc<RateLimiter>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            plan,
            base,
            queries,
            queue,
            limiter,
            cancel,
        }
    }

    pub fn plan(&self) -> &WorkloadPlan {
        &self.plan
    }

    /// Emit the whole task stream, then close the queue.
    ///
    /// Only pipeline protocol violations are returned as errors; cancellation
    /// ends the stream early and is reported in [`ProducerReport::cancelled`].
    pub async fn run(self) -> BenchResult<ProducerReport> {
        let closer = CloseOnDrop::new(self.queue.clone());
        let produced = self.produce().await;
        let closed = closer.close();

        let report = produced?;
        closed?;
        tracing::info!(
            insert_batches = report.insert_batches,
            search_batches = report.search_batches,
            skipped = report.skipped_batches,
            cancelled = report.cancelled,
            "Producer finished"
        );
        Ok(report)
    }

    async fn produce(&self) -> BenchResult<ProducerReport> {
        let mut report = ProducerReport::default();
        if self.plan.is_empty() {
            tracing::info!(
                begin = self.plan.begin,
                end = self.plan.end,
                "Nothing to insert, producer closing immediately"
            );
            return Ok(report);
        }

        let mut query_cursor = 0usize;
        for range in self.plan.insert_ranges() {
            let insert = Task::insert(
                self.base.points()[range.clone()].to_vec(),
                range.clone().map(|offset| offset as u32).collect(),
            );
            if !self.submit(insert, &mut report).await? {
                break;
            }

            let search = self.search_task(&range, &mut query_cursor);
            if !self.submit(search, &mut report).await? {
                break;
            }
        }
        Ok(report)
    }

    fn search_task(&self, range: &Range<usize>, cursor: &mut usize) -> Option<Task> {
        let len = self.plan.search_len(range);
        let (vectors, tags): (Vec<_>, Vec<u32>) = match self.plan.queries {
            QuerySource::Disabled => return None,
            _ if len == 0 => return None,
            QuerySource::NewData => self
                .plan
                .new_data_offsets(range.end, len)
                .map(|offset| (self.base.points()[offset].clone(), offset as u32))
                .unzip(),
            QuerySource::QuerySet { count } => (0..len)
                .map(|_| {
                    let idx = *cursor % count;
                    *cursor += 1;
                    (self.queries.points()[idx].clone(), idx as u32)
                })
                .unzip(),
        };
        Task::search(vectors, tags, self.plan.search)
    }

    /// Admit and enqueue one task. `Ok(false)` means the run was cancelled.
    async fn submit(&self, task: Option<Task>, report: &mut ProducerReport) -> BenchResult<bool> {
        let Some(task) = task else {
            return Ok(true);
        };
        let (kind, points) = (task.kind(), task.len());

        match self.limiter.admit(&self.cancel).await {
            Ok(()) => {}
            Err(BenchError::RateLimited) => {
                self.abandon(kind, report);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            enqueued = self.queue.enqueue(task) => enqueued?,
            _ = self.cancel.cancelled() => {
                self.abandon(kind, report);
                return Ok(false);
            }
        }

        match kind {
            TaskKind::Insert => {
                report.insert_batches += 1;
                report.insert_points += points;
            }
            TaskKind::Search => {
                report.search_batches += 1;
                report.search_points += points;
            }
        }
        tracing::trace!(%kind, points, "Enqueued batch");
        Ok(true)
    }

    fn abandon(&self, kind: TaskKind, report: &mut ProducerReport) {
        report.skipped_batches += 1;
        report.cancelled = true;
        tracing::info!(%kind, "Run cancelled, producer stopping");
    }
}
