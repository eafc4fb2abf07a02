/// ccbench - concurrent insert/search benchmark driver
///
/// Usage:
///   ccbench run --config bench.json [overrides]   - Run one benchmark
///   ccbench gt --base b.bin --query q.bin --out gt.bin -k 100
///                                                 - Compute exact ground truth
///   ccbench synth --out-dir data -n 100000 --dim 128
///                                                 - Write a synthetic dataset
use ann_cc_bench::config::{BenchConfig, ConsistencyMode, ResultRetention};
use ann_cc_bench::dataset::VectorSet;
use ann_cc_bench::recall::compute_ground_truth;
use ann_cc_bench::report::{CsvRecord, append_csv, print_summary};
use ann_cc_bench::{Bench, create_index};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ccbench")]
#[command(about = "Concurrent insert/search benchmarks for ANN indexes", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark described by a JSON config
    ///
    /// Examples:
    ///   ccbench run --config bench.json
    ///   ccbench run --config bench.json --threads 16 --write-ratio 0.1
    Run(RunArgs),

    /// Compute exact ground truth for a base/query pair
    Gt {
        /// Base vectors (.bin)
        #[arg(long)]
        base: PathBuf,

        /// Query vectors (.bin)
        #[arg(long)]
        query: PathBuf,

        /// Output truth-set file
        #[arg(long)]
        out: PathBuf,

        /// Neighbors per query
        #[arg(short = 'k', long = "neighbors", default_value_t = 100)]
        k: usize,
    },

    /// Write a synthetic base/query dataset
    Synth {
        /// Output directory (receives base.bin and query.bin)
        #[arg(long)]
        out_dir: PathBuf,

        /// Number of base vectors
        #[arg(short = 'n', long = "num", default_value_t = 10_000)]
        n: usize,

        /// Number of query vectors
        #[arg(short, long, default_value_t = 100)]
        queries: usize,

        /// Vector dimension
        #[arg(long, default_value_t = 128)]
        dim: usize,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Benchmark configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker count (0 = available parallelism)
    #[arg(long)]
    threads: Option<usize>,

    /// Fraction of operations that are inserts
    #[arg(long)]
    write_ratio: Option<f64>,

    /// Points per insert batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Task queue capacity
    #[arg(long)]
    queue_size: Option<usize>,

    /// Batches per second per worker (<= 0 for unlimited)
    #[arg(long)]
    input_rate: Option<f64>,

    /// enforced | relaxed
    #[arg(long)]
    consistency: Option<ConsistencyMode>,

    /// Search freshly inserted points instead of the query set
    #[arg(long)]
    query_new_data: bool,

    /// hnsw | flat
    #[arg(long)]
    index: Option<String>,

    /// Keep only counters of search results
    #[arg(long)]
    summary_only: bool,

    /// Use a synthetic dataset of this many points instead of data_path
    #[arg(long)]
    synthetic: Option<usize>,

    /// Dimension of the synthetic dataset
    #[arg(long, default_value_t = 128)]
    dim: usize,
}

impl RunArgs {
    fn apply(&self, config: &mut BenchConfig) {
        if let Some(threads) = self.threads {
            config.workload.num_threads = threads;
        }
        if let Some(ratio) = self.write_ratio {
            config.workload.write_ratio = ratio;
        }
        if let Some(batch) = self.batch_size {
            config.data.write_batch_size = batch;
        }
        if let Some(size) = self.queue_size {
            config.workload.queue_size = size;
        }
        if let Some(rate) = self.input_rate {
            config.workload.input_rate = rate;
        }
        if let Some(mode) = self.consistency {
            config.workload.consistency = mode;
        }
        if self.query_new_data {
            config.workload.query_new_data = true;
        }
        if let Some(index) = &self.index {
            config.index.index_type = index.clone();
        }
        if self.summary_only {
            config.workload.result_retention = ResultRetention::SummaryOnly;
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run(args) => run_benchmark(args).await,
        Commands::Gt { base, query, out, k } => write_ground_truth(&base, &query, &out, k).await,
        Commands::Synth {
            out_dir,
            n,
            queries,
            dim,
            seed,
        } => write_synthetic(&out_dir, n, queries, dim, seed).await,
    }
}

async fn run_benchmark(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BenchConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let (base, queries) = match args.synthetic {
        Some(n) => {
            let dim = args.dim;
            let queries = config.data.max_queries.min(1_000);
            tokio::task::spawn_blocking(move || {
                (VectorSet::synthetic(n, dim, 1), VectorSet::synthetic(queries, dim, 2))
            })
            .await?
        }
        None => {
            let (data_path, query_path) = (config.data.data_path.clone(), config.data.query_path.clone());
            tokio::task::spawn_blocking(move || -> Result<_> {
                let base = VectorSet::load_bin(&data_path)
                    .with_context(|| format!("Failed to load base vectors {}", data_path.display()))?;
                let queries = VectorSet::load_bin(&query_path)
                    .with_context(|| format!("Failed to load queries {}", query_path.display()))?;
                Ok((base, queries))
            })
            .await??
        }
    };

    let index = create_index(&config, base.dimensions())?;
    let bench = Bench::new(config.clone(), index.clone(), Arc::new(base), Arc::new(queries))
        .context("Failed to set up benchmark")?;

    let cancel = bench.cancel_handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping producer");
            cancel.cancel();
        }
    });

    let outcome = bench.run().await.context("Benchmark aborted")?;

    let record = CsvRecord::new(&config, index.name(), &outcome.summary, outcome.recall);
    print_summary(&record, outcome.summary.elapsed_secs);
    if outcome.producer.cancelled {
        println!("{}", "Run was cancelled before all batches were submitted".yellow());
    }

    match append_csv(&config.result.output_dir, &record) {
        Ok(path) => println!("  Results appended to {}", path.display().to_string().bright_black()),
        Err(e) => tracing::warn!(error = %e, "Failed to write CSV summary"),
    }
    Ok(())
}

async fn write_ground_truth(base: &Path, query: &Path, out: &Path, k: usize) -> Result<()> {
    let (base, query, out) = (base.to_path_buf(), query.to_path_buf(), out.to_path_buf());
    let written = tokio::task::spawn_blocking(move || -> Result<(usize, PathBuf)> {
        let base = VectorSet::load_bin(&base).context("Failed to load base vectors")?;
        let queries = VectorSet::load_bin(&query).context("Failed to load queries")?;
        let truth = compute_ground_truth(&base, &queries, k)?;
        truth.write(&out).with_context(|| format!("Failed to write {}", out.display()))?;
        Ok((truth.len(), out))
    })
    .await??;

    println!("{}", "OK".green().bold());
    println!("  Ground truth for {} queries written to {}", written.0, written.1.display().to_string().cyan());
    Ok(())
}

async fn write_synthetic(out_dir: &Path, n: usize, queries: usize, dim: usize, seed: u64) -> Result<()> {
    let base_path = out_dir.join("base.bin");
    let query_path = out_dir.join("query.bin");
    let (b, q) = (base_path.clone(), query_path.clone());

    tokio::task::spawn_blocking(move || -> Result<()> {
        VectorSet::synthetic(n, dim, seed).write_bin(&b)?;
        VectorSet::synthetic(queries, dim, seed.wrapping_add(1)).write_bin(&q)?;
        Ok(())
    })
    .await?
    .context("Failed to write synthetic dataset")?;

    println!("{}", "OK".green().bold());
    println!("  Base:  {} ({} x {})", base_path.display().to_string().cyan(), n, dim);
    println!("  Query: {} ({} x {})", query_path.display().to_string().cyan(), queries, dim);
    Ok(())
}
