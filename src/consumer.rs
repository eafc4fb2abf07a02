//! The consumer pool: workers executing queued tasks against the index.
//!
//! Each worker loops dequeue → time → dispatch under the run's
//! [`ConsistencyDiscipline`] → record. Index calls are blocking, so they run
//! on tokio's blocking pool with the access permit moved into the closure;
//! the permit is released the moment the index call returns.
//!
//! A failed task is logged and dropped. It is never retried and never stops
//! the worker.

use crate::config::ResultRetention;
use crate::consistency::{AccessPermit, ConsistencyDiscipline};
use crate::error::BenchResult;
use crate::index::{AnnIndex, Neighbor};
use crate::queue::TaskQueue;
use crate::stats::StatsAccumulator;
use crate::task::{SearchResult, Task, TaskKind};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::task::JoinHandle;

/// Shared collection of completed search results.
#[derive(Debug)]
pub struct ResultStore {
    retention: ResultRetention,
    results: Mutex<Vec<SearchResult>>,
    count: AtomicU64,
    returned_tags: AtomicU64,
}

impl ResultStore {
    pub fn new(retention: ResultRetention) -> Self {
        Self {
            retention,
            results: Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
            returned_tags: AtomicU64::new(0),
        }
    }

    pub fn retention(&self) -> ResultRetention {
        self.retention
    }

    /// Append the results of one search batch.
    pub fn append(&self, batch: Vec<SearchResult>) {
        let tags: usize = batch.iter().map(|r| r.returned_tags.len()).sum();
        self.count.fetch_add(batch.len() as u64, Ordering::AcqRel);
        self.returned_tags.fetch_add(tags as u64, Ordering::AcqRel);

        if self.retention == ResultRetention::KeepAll {
            self.results
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(batch);
        }
    }

    /// Results appended so far, whether retained or not.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Total neighbor tags returned across all results.
    pub fn returned_tags(&self) -> u64 {
        self.returned_tags.load(Ordering::Acquire)
    }

    /// Move the retained results out, leaving the store empty.
    pub fn take(&self) -> Vec<SearchResult> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Per-run totals of what the workers did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: usize,
    pub inserts: u64,
    pub searches: u64,
    /// Tasks dropped after an index error
    pub failed: u64,
}

impl PoolReport {
    fn merge(&mut self, other: PoolReport) {
        self.inserts += other.inserts;
        self.searches += other.searches;
        self.failed += other.failed;
    }
}

struct WorkerContext {
    index: Arc<dyn AnnIndex>,
    discipline: Arc<dyn ConsistencyDiscipline>,
    stats: Arc<StatsAccumulator>,
    results: Arc<ResultStore>,
    record_distances: bool,
}

enum Outcome {
    Inserted,
    Searched(Vec<SearchResult>),
}

/// Fixed-size pool of workers sharing one index.
pub struct ConsumerPool {
    workers: usize,
    ctx: Arc<WorkerContext>,
}

impl ConsumerPool {
    /// Create a pool of `workers` (at least one).
    pub fn new(
        workers: usize,
        index: Arc<dyn AnnIndex>,
        discipline: Arc<dyn ConsistencyDiscipline>,
        stats: Arc<StatsAccumulator>,
        results: Arc<ResultStore>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            ctx: Arc::new(WorkerContext {
                index,
                discipline,
                stats,
                results,
                record_distances: false,
            }),
        }
    }

    /// Keep neighbor distances in each [`SearchResult`].
    ///
    /// Must be called before the pool is started.
    pub fn with_distances(mut self, record: bool) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.record_distances = record;
        }
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start every worker on `queue`.
    pub fn spawn(&self, queue: Arc<TaskQueue>) -> Vec<JoinHandle<PoolReport>> {
        tracing::info!(
            workers = self.workers,
            consistency = %self.ctx.discipline.mode(),
            "Starting consumer pool"
        );
        (0..self.workers)
            .map(|id| tokio::spawn(worker_loop(id, self.ctx.clone(), queue.clone())))
            .collect()
    }

    /// Run the pool until `queue` is closed and drained.
    pub async fn run(&self, queue: Arc<TaskQueue>) -> BenchResult<PoolReport> {
        let handles = self.spawn(queue);
        let mut report = PoolReport {
            workers: self.workers,
            ..Default::default()
        };
        for joined in join_all(handles).await {
            report.merge(joined?);
        }
        tracing::info!(
            inserts = report.inserts,
            searches = report.searches,
            failed = report.failed,
            "Consumer pool drained"
        );
        Ok(report)
    }
}

async fn worker_loop(id: usize, ctx: Arc<WorkerContext>, queue: Arc<TaskQueue>) -> PoolReport {
    let mut report = PoolReport::default();

    // The permit is taken before the next worker may dequeue, so permits are
    // granted in queue order.
    while let Some((task, (started, permit))) = queue
        .dequeue_with(|task| {
            let started = Instant::now();
            let permit = ctx.discipline.before(task.kind());
            async move { (started, permit.await) }
        })
        .await
    {
        let (kind, points) = (task.kind(), task.len());

        match execute(&ctx, task, permit).await {
            Ok(Outcome::Inserted) => {
                ctx.stats.record_insert(started.elapsed(), points);
                report.inserts += 1;
            }
            Ok(Outcome::Searched(results)) => {
                ctx.stats.record_search(started.elapsed(), points);
                ctx.results.append(results);
                report.searches += 1;
            }
            Err(e) => {
                tracing::warn!(worker = id, %kind, points, error = %e, "Dropping failed task");
                report.failed += 1;
            }
        }
    }

    tracing::debug!(worker = id, inserts = report.inserts, searches = report.searches, "Worker exiting");
    report
}

async fn execute(ctx: &WorkerContext, task: Task, permit: AccessPermit) -> BenchResult<Outcome> {
    let index = ctx.index.clone();
    match task.kind() {
        TaskKind::Insert => {
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                index.batch_insert(task.vectors(), task.tags())
            })
            .await??;
            Ok(Outcome::Inserted)
        }
        TaskKind::Search => {
            let params = task.search_params().copied().unwrap_or_default();
            let k = params.recall_at as usize;
            let (task, neighbors) = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                index
                    .batch_search(task.vectors(), k, &params.query)
                    .map(|neighbors| (task, neighbors))
            })
            .await??;
            Ok(Outcome::Searched(ctx.to_results(&task, neighbors, k)))
        }
    }
}

impl WorkerContext {
    fn to_results(&self, task: &Task, neighbors: Vec<Vec<Neighbor>>, k: usize) -> Vec<SearchResult> {
        let snapshot = self.stats.inserted_points();
        neighbors
            .into_iter()
            .zip(task.tags())
            .enumerate()
            .map(|(i, (mut found, &query_tag))| {
                found.truncate(k);
                SearchResult {
                    insert_offset_snapshot: snapshot,
                    query_index: i as u32,
                    query_tag,
                    returned_tags: found.iter().map(|n| n.tag).collect(),
                    distances: if self.record_distances {
                        found.iter().map(|n| n.distance).collect()
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsistencyMode;
    use crate::consistency::discipline_for;
    use crate::error::IndexError;
    use crate::index::{FlatIndex, Point, QueryParams};
    use crate::task::SearchParams;

    fn point(x: f32) -> Point {
        Point::from(vec![x, 0.0])
    }

    fn search_params(k: u32) -> SearchParams {
        SearchParams {
            recall_at: k,
            query: QueryParams::default(),
        }
    }

    fn pool(index: Arc<dyn AnnIndex>, retention: ResultRetention) -> (ConsumerPool, Arc<StatsAccumulator>, Arc<ResultStore>) {
        let stats = Arc::new(StatsAccumulator::new());
        let results = Arc::new(ResultStore::new(retention));
        let pool = ConsumerPool::new(
            3,
            index,
            discipline_for(ConsistencyMode::Enforced),
            stats.clone(),
            results.clone(),
        );
        (pool, stats, results)
    }

    #[tokio::test]
    async fn test_pool_executes_and_records() {
        let index = Arc::new(FlatIndex::new(2));
        let (pool, stats, results) = pool(index.clone(), ResultRetention::KeepAll);
        let pool = pool.with_distances(true);
        let queue = Arc::new(TaskQueue::new(16));

        let vectors: Vec<Point> = (0..10).map(|i| point(i as f32)).collect();
        queue
            .enqueue(Task::insert(vectors, (0..10).collect()).unwrap())
            .await
            .unwrap();
        queue.close().unwrap();
        pool.run(queue).await.unwrap();
        assert_eq!(index.len(), 10);

        // Second phase: searches against the populated index
        let queue = Arc::new(TaskQueue::new(16));
        queue
            .enqueue(Task::search(vec![point(3.1), point(7.9)], vec![100, 101], search_params(2)).unwrap())
            .await
            .unwrap();
        queue.close().unwrap();
        let report = pool.run(queue).await.unwrap();

        assert_eq!(report.searches, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(stats.snapshot().insert.points, 10);
        assert_eq!(stats.snapshot().search.points, 2);

        let mut kept = results.take();
        kept.sort_by_key(|r| r.query_index);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].query_tag, 100);
        assert_eq!(kept[0].returned_tags, vec![3, 4]);
        assert_eq!(kept[1].returned_tags, vec![8, 7]);
        assert_eq!(kept[0].distances.len(), 2);
        assert_eq!(kept[0].insert_offset_snapshot, 10);
    }

    #[derive(Debug)]
    struct RejectingIndex;

    impl AnnIndex for RejectingIndex {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn len(&self) -> usize {
            0
        }
        fn insert(&self, _: &[f32], _: u32) -> Result<(), IndexError> {
            Err(IndexError::Rejected("read only".into()))
        }
        fn set_query_params(&self, _: QueryParams) {}
        fn search(&self, _: &[f32], _: usize, _: &QueryParams) -> Result<Vec<Neighbor>, IndexError> {
            Err(IndexError::Rejected("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_tasks_are_dropped() {
        let (pool, stats, results) = pool(Arc::new(RejectingIndex), ResultRetention::KeepAll);
        let queue = Arc::new(TaskQueue::new(8));
        for i in 0..4 {
            queue.enqueue(Task::insert(vec![point(1.0)], vec![i]).unwrap()).await.unwrap();
            queue
                .enqueue(Task::search(vec![point(1.0)], vec![i], search_params(1)).unwrap())
                .await
                .unwrap();
        }
        queue.close().unwrap();

        let report = pool.run(queue).await.unwrap();
        assert_eq!(report.failed, 8);
        assert_eq!(report.inserts + report.searches, 0);
        assert_eq!(stats.snapshot(), Default::default());
        assert_eq!(results.count(), 0);
    }

    #[tokio::test]
    async fn test_summary_only_retention() {
        let index = Arc::new(FlatIndex::new(2));
        index.insert(&[0.0, 0.0], 0).unwrap();
        let (pool, _, results) = pool(index, ResultRetention::SummaryOnly);

        let queue = Arc::new(TaskQueue::new(8));
        queue
            .enqueue(Task::search(vec![point(0.0), point(1.0)], vec![0, 1], search_params(5)).unwrap())
            .await
            .unwrap();
        queue.close().unwrap();
        pool.run(queue).await.unwrap();

        assert_eq!(results.count(), 2);
        assert_eq!(results.returned_tags(), 2);
        assert!(results.take().is_empty());
    }

    #[test]
    fn test_result_store_keep_all() {
        let store = ResultStore::new(ResultRetention::KeepAll);
        store.append(vec![SearchResult {
            insert_offset_snapshot: 0,
            query_index: 0,
            query_tag: 4,
            returned_tags: vec![1, 2, 3],
            distances: Vec::new(),
        }]);
        assert_eq!(store.count(), 1);
        assert_eq!(store.returned_tags(), 3);
        assert_eq!(store.take().len(), 1);
        assert!(store.take().is_empty());
    }
}
