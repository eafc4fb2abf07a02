//! Run reporting: the CSV summary file and the console summary.

use crate::config::BenchConfig;
use crate::error::BenchResult;
use crate::stats::{LatencySummary, RunSummary};
use colored::*;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the CSV summary inside the output directory.
pub const CSV_FILE: &str = "benchmark_results.csv";

/// Header row of the CSV summary.
pub const CSV_HEADER: &str = "algorithm,threads,batch_size,write_ratio,\
insert_p95_latency (ms),insert_p99_latency (ms),insert_mean_latency (ms),insert_qps,\
search_p95_latency (ms),search_p99_latency (ms),search_mean_latency (ms),search_qps,recall";

/// One CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    pub algorithm: String,
    pub threads: usize,
    pub batch_size: usize,
    pub write_ratio: f64,
    pub insert: LatencySummary,
    pub search: LatencySummary,
    /// `None` when recall was skipped or failed
    pub recall: Option<f64>,
}

impl CsvRecord {
    pub fn new(config: &BenchConfig, algorithm: &str, summary: &RunSummary, recall: Option<f64>) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            threads: config.workload.effective_threads(),
            batch_size: config.data.write_batch_size,
            write_ratio: config.workload.write_ratio,
            insert: summary.insert,
            search: summary.search,
            recall,
        }
    }

    /// Render as a CSV line (no trailing newline). Unavailable recall is written as 0.
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.3}",
            self.algorithm,
            self.threads,
            self.batch_size,
            self.write_ratio,
            self.insert.p95_ms,
            self.insert.p99_ms,
            self.insert.mean_ms,
            self.insert.qps,
            self.search.p95_ms,
            self.search.p99_ms,
            self.search.mean_ms,
            self.search.qps,
            self.recall.unwrap_or(0.0),
        )
    }
}

/// Append `record` to `<dir>/benchmark_results.csv`, writing the header only
/// when the file is created. Returns the file path.
pub fn append_csv(dir: impl AsRef<Path>, record: &CsvRecord) -> BenchResult<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CSV_FILE);

    let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
    if file.metadata()?.len() == 0 {
        writeln!(file, "{}", CSV_HEADER)?;
    }
    writeln!(file, "{}", record.to_row())?;

    tracing::info!(path = %path.display(), "Appended benchmark result");
    Ok(path)
}

/// Print the final summary to stdout.
pub fn print_summary(record: &CsvRecord, elapsed_secs: f64) {
    println!();
    println!("{}", "Benchmark Summary".bold().cyan());
    println!();
    println!(
        "  {} {}  {} {}  {} {}  {} {:.2}",
        "Index:".bright_white(),
        record.algorithm.cyan(),
        "Threads:".bright_white(),
        record.threads,
        "Batch:".bright_white(),
        record.batch_size,
        "Write ratio:".bright_white(),
        record.write_ratio
    );
    println!("  {} {:.2}s", "Elapsed:".bright_white(), elapsed_secs);
    println!();
    print_op("Insert", &record.insert);
    print_op("Search", &record.search);
    println!();

    match record.recall {
        Some(recall) => println!("  {} {}", "Recall:".bright_white(), format!("{:.3}%", recall).green().bold()),
        None => println!("  {} {}", "Recall:".bright_white(), "n/a".yellow()),
    }
    println!();
}

fn print_op(label: &str, op: &LatencySummary) {
    if op.ops == 0 {
        println!("  {} {}", format!("{:<7}", label).bold(), "no operations".bright_black());
        return;
    }
    println!(
        "  {} {} ops, {} points  mean {:.2}ms  p95 {:.2}ms  p99 {:.2}ms  {} qps",
        format!("{:<7}", label).bold(),
        op.ops,
        op.points,
        op.mean_ms,
        op.p95_ms,
        op.p99_ms,
        format!("{:.2}", op.qps).green()
    );
}
