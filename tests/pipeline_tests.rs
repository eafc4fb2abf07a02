//! Integration tests for the producer/queue/consumer pipeline.
//!
//! These drive complete runs through [`Bench`] against a recording mock
//! index and check what the index actually observed.

mod common;

use ann_cc_bench::prelude::*;
use common::RecordingIndex;
use std::time::Duration;

/// Test that a 50/50 workload alternates equal-sized insert and search batches
#[tokio::test]
async fn test_half_write_ratio_batches() {
    let config = common::config(100, 10, 0.5, 4);
    let (base, queries) = common::datasets(100, 20);
    let index = Arc::new(RecordingIndex::new(8));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    let inserts = index.calls_of(TaskKind::Insert);
    let searches = index.calls_of(TaskKind::Search);
    assert_eq!(inserts.len(), 10);
    assert_eq!(searches.len(), 10);
    assert!(inserts.iter().all(|c| c.tags.len() == 10));

    let mut tags: Vec<u32> = inserts.iter().flat_map(|c| c.tags.clone()).collect();
    tags.sort_unstable();
    assert_eq!(tags, (0..100).collect::<Vec<u32>>());

    assert_eq!(outcome.producer.insert_points, 100);
    assert_eq!(outcome.producer.search_points, 100);
    assert_eq!(outcome.summary.search.points, 100);
    assert_eq!(outcome.result_count, 100);
    assert!(!outcome.producer.cancelled);
}

/// Test that write ratio 1.0 produces no searches at all
#[tokio::test]
async fn test_write_only_run() {
    let config = common::config(60, 7, 1.0, 3);
    let (base, queries) = common::datasets(60, 5);
    let index = Arc::new(RecordingIndex::new(8));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(index.calls_of(TaskKind::Insert).len(), 9);
    assert!(index.calls_of(TaskKind::Search).is_empty());
    assert_eq!(outcome.summary.search.ops, 0);
    assert_eq!(outcome.summary.search.qps, 0.0);
    assert_eq!(index.len(), 60);
}

/// Test that query-new-data searches only target points already inserted
#[tokio::test]
async fn test_query_new_data_targets_inserted_points() {
    let mut config = common::config(80, 8, 0.5, 1);
    config.workload.query_new_data = true;
    let (base, queries) = common::datasets(80, 0);
    let index = Arc::new(RecordingIndex::new(8).with_base(&base));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 80);
    for result in &outcome.results {
        assert!((result.query_tag as u64) < result.insert_offset_snapshot);
    }

    let searches = index.calls_of(TaskKind::Search);
    assert_eq!(searches.len(), 10);
    for (i, search) in searches.iter().enumerate() {
        // Each search targets the batch inserted just before it
        let end = 8 * (i as u32 + 1);
        assert_eq!(search.tags, (end - 8..end).collect::<Vec<u32>>());
        assert!(search.uncommitted.is_empty(), "searched {:?} before insert", search.uncommitted);
    }
}

/// Test that returned neighbors are bounded by k and by the inserted range
#[tokio::test]
async fn test_search_results_stay_in_inserted_range() {
    let config = common::config(200, 10, 0.25, 4);
    let (base, queries) = common::datasets(200, 10);
    let index = Arc::new(RecordingIndex::new(8));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.pool.failed, 0);
    for result in &outcome.results {
        assert!(result.returned_tags.len() <= 5);
        assert!(result.returned_tags.iter().all(|&tag| tag < 200));
    }
    // 0.25 write ratio: 30 query points per 10 inserted
    assert_eq!(outcome.producer.search_points, 600);
}

/// Test that failed inserts are counted and the run still completes
#[tokio::test]
async fn test_index_failures_do_not_abort_the_run() {
    let config = common::config(100, 10, 0.5, 2);
    let (base, queries) = common::datasets(100, 10);
    let index = Arc::new(RecordingIndex::new(8).rejecting_every(3));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.pool.failed, 3);
    assert_eq!(outcome.pool.inserts, 7);
    assert_eq!(outcome.pool.searches, 10);
    assert_eq!(outcome.summary.insert.ops, 7);
    assert_eq!(index.len(), 70);
}

/// Test that cancelling a rate-limited run stops the producer and drains the queue
#[tokio::test]
async fn test_cancellation_drains_enqueued_tasks() {
    let mut config = common::config(1_000, 10, 0.5, 1);
    // One batch per second after the initial burst of one
    config.workload.input_rate = 1.0;
    let (base, queries) = common::datasets(1_000, 10);
    let index = Arc::new(RecordingIndex::new(8));

    let bench = Bench::new(config, index.clone(), base, queries).unwrap();
    let cancel = bench.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(10), bench.run())
        .await
        .expect("cancelled run must finish promptly")
        .unwrap();

    assert!(outcome.producer.cancelled);
    assert!(outcome.producer.insert_batches < 100);
    let enqueued = (outcome.producer.insert_batches + outcome.producer.search_batches) as u64;
    assert_eq!(outcome.pool.inserts + outcome.pool.searches + outcome.pool.failed, enqueued);
    assert_eq!(index.calls().len() as u64, enqueued);
}

/// Test that summary-only retention counts results without keeping them
#[tokio::test]
async fn test_summary_only_retention() {
    let mut config = common::config(50, 10, 0.5, 2);
    config.workload.result_retention = ResultRetention::SummaryOnly;
    let (base, queries) = common::datasets(50, 10);

    let index = create_index(&config, 8).unwrap();
    let outcome = Bench::new(config, index, base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(outcome.results.is_empty());
    assert_eq!(outcome.result_count, 50);
}
