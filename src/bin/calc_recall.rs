/// calc_recall - score a search-result file against a truth set
///
/// Usage:
///   calc_recall <ground_truth> <results> <recall_at>
///
/// Prints `recall@<recall_at> = <percent>%` and exits non-zero on malformed input.
use ann_cc_bench::recall::{TruthSet, calculate_recall, read_results};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "calc_recall")]
#[command(about = "Compute recall@k of a result file against ground truth", long_about = None)]
#[command(version)]
struct Cli {
    /// Truth-set file (ids, optionally followed by distances)
    ground_truth: PathBuf,

    /// Result file written by the benchmark
    results: PathBuf,

    /// Number of leading neighbors scored per query
    recall_at: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let truth = TruthSet::load(&cli.ground_truth)
        .with_context(|| format!("Failed to read ground truth {}", cli.ground_truth.display()))?;
    let results = read_results(&cli.results)
        .with_context(|| format!("Failed to read results {}", cli.results.display()))?;

    let recall = calculate_recall(&truth, &results, cli.recall_at).context("Cannot compute recall")?;
    println!("recall@{} = {:.4}%", cli.recall_at, recall);
    Ok(())
}
