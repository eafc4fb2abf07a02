//! Pipeline Benchmark
//!
//! Measures a complete harness run (producer, queue, worker pool) over
//! 5,000 synthetic 64d vectors against the shipped indexes.
//!
//! Metrics:
//! - Run time per consistency mode for hnsw and flat
//! - Raw search latency of a pre-built hnsw index

use ann_cc_bench::prelude::*;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

const POINTS: usize = 5_000;
const DIM: usize = 64;

fn config(index_type: &str, mode: ConsistencyMode) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.index.index_type = index_type.to_string();
    config.index.ef_construction = 64;
    config.data.max_elements = POINTS;
    config.data.write_batch_size = 100;
    config.workload.num_threads = 4;
    config.workload.consistency = mode;
    config.workload.result_retention = ResultRetention::SummaryOnly;
    config
}

/// Benchmark: full run, enforced vs relaxed
fn bench_run(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let base = Arc::new(VectorSet::synthetic(POINTS, DIM, 42));
    let queries = Arc::new(VectorSet::synthetic(200, DIM, 43));

    let mut group = c.benchmark_group("run");
    group.sample_size(10);

    for index_type in ["hnsw", "flat"] {
        for mode in [ConsistencyMode::Enforced, ConsistencyMode::Relaxed] {
            let config = config(index_type, mode);
            group.bench_function(BenchmarkId::new(index_type, mode), |b| {
                b.to_async(&runtime).iter(|| {
                    let config = config.clone();
                    let (base, queries) = (base.clone(), queries.clone());
                    async move {
                        let index = create_index(&config, DIM).unwrap();
                        let outcome = Bench::new(config, index, base, queries)
                            .unwrap()
                            .run()
                            .await
                            .unwrap();
                        black_box(outcome.summary);
                    }
                });
            });
        }
    }
    group.finish();
}

/// Benchmark: search latency on a pre-built hnsw index
fn bench_hnsw_search(c: &mut Criterion) {
    let base = VectorSet::synthetic(POINTS, DIM, 42);
    let queries = VectorSet::synthetic(100, DIM, 43);
    let index = HnswIndex::new(DIM, HnswConfig::with_m(16).ef_construction(64));
    let tags: Vec<u32> = (0..POINTS as u32).collect();
    index.build(base.points(), &tags).unwrap();

    let mut group = c.benchmark_group("search");
    for ef in [16usize, 64] {
        let params = QueryParams {
            ef_search: ef,
            ..Default::default()
        };
        group.bench_function(BenchmarkId::new("hnsw_ef", ef), |b| {
            b.iter(|| black_box(index.batch_search(queries.points(), 10, &params).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_run, bench_hnsw_search);
criterion_main!(benches);
