//! Integration tests for the consistency disciplines under real contention.

mod common;

use ann_cc_bench::prelude::*;
use common::RecordingIndex;
use std::time::Duration;

/// Test that in enforced mode no search window overlaps an insert window
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enforced_mode_isolates_inserts() {
    let config = common::config(200, 10, 0.5, 6);
    let (base, queries) = common::datasets(200, 16);
    let index = Arc::new(RecordingIndex::new(8).with_delay(Duration::from_millis(2)));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(outcome.pool.failed, 0);

    let inserts = index.calls_of(TaskKind::Insert);
    let searches = index.calls_of(TaskKind::Search);
    assert_eq!(inserts.len(), 20);
    assert_eq!(searches.len(), 20);

    for insert in &inserts {
        for search in &searches {
            assert!(!insert.overlaps(search), "search ran during an insert");
        }
        for other in &inserts {
            if !std::ptr::eq(insert, other) {
                assert!(!insert.overlaps(other), "two inserts ran concurrently");
            }
        }
    }
}

/// Test that searches see a stable committed set in enforced mode
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enforced_mode_searches_see_whole_batches() {
    let config = common::config(120, 10, 0.5, 4);
    let (base, queries) = common::datasets(120, 16);
    let index = Arc::new(RecordingIndex::new(8).with_delay(Duration::from_millis(1)));

    Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    // Inserts are atomic relative to searches: whole batches only
    for search in index.calls_of(TaskKind::Search) {
        assert_eq!(search.committed_before % 10, 0);
    }
}

/// Test that relaxed mode lets operations run concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_relaxed_mode_allows_overlap() {
    let mut config = common::config(200, 10, 0.5, 4);
    config.workload.consistency = ConsistencyMode::Relaxed;
    let (base, queries) = common::datasets(200, 16);
    let index = Arc::new(RecordingIndex::new(8).with_delay(Duration::from_millis(20)));

    let outcome = Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.pool.inserts, 20);
    assert_eq!(outcome.pool.searches, 20);
    assert!(index.max_in_flight() > 1);
}

/// Test that inserts stay isolated on a search-heavy enforced workload
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_enforced_mode_search_heavy_isolation() {
    // Search-heavy so several searches queue up behind each insert
    let config = common::config(100, 5, 0.1, 6);
    let (base, queries) = common::datasets(100, 16);
    let index = Arc::new(RecordingIndex::new(8).with_delay(Duration::from_millis(5)));

    Bench::new(config, index.clone(), base, queries)
        .unwrap()
        .run()
        .await
        .unwrap();

    let inserts = index.calls_of(TaskKind::Insert);
    for call in index.calls() {
        for insert in &inserts {
            if call.start != insert.start {
                assert!(!call.overlaps(insert));
            }
        }
    }
}

/// Test that with many workers a search never runs ahead of the insert queued before it
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_enforced_mode_preserves_queue_order_across_workers() {
    for round in 0..5 {
        let mut config = common::config(400, 1, 0.5, 8);
        config.workload.query_new_data = true;
        let (base, queries) = common::datasets(400, 0);
        let index = Arc::new(RecordingIndex::new(8).with_base(&base));

        Bench::new(config, index.clone(), base, queries)
            .unwrap()
            .run()
            .await
            .unwrap();

        let searches = index.calls_of(TaskKind::Search);
        assert_eq!(searches.len(), 400);
        for search in searches {
            assert_eq!(search.tags.len(), 1);
            assert!(
                search.uncommitted.is_empty(),
                "round {}: tag {:?} searched before it was inserted",
                round,
                search.uncommitted
            );
        }
    }
}

