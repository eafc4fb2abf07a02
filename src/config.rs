//! Benchmark configuration.
//!
//! A run is described by a single JSON document with five sections
//! (`data`, `index`, `search`, `workload`, `result`). Every field has a
//! default, so a config file only needs to name what it changes:
//!
//! ```ignore
//! {
//!   "data": { "data_path": "data/base.bin", "query_path": "data/query.bin",
//!             "max_elements": 100000, "write_batch_size": 100 },
//!   "workload": { "write_ratio": 0.5, "num_threads": 8, "consistency": "enforced" }
//! }
//! ```

use crate::error::{BenchError, BenchResult};
use crate::index::QueryParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dataset selection and batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Human readable dataset name (reporting only)
    pub dataset_name: String,
    /// Aligned `.bin` file with the base vectors
    pub data_path: PathBuf,
    /// Aligned `.bin` file with the query vectors
    pub query_path: PathBuf,
    /// Upper bound on the number of points that may ever be inserted
    pub max_elements: usize,
    /// Points bulk-loaded with `build` before the timed run
    pub begin_num: usize,
    /// Points per insert batch
    pub write_batch_size: usize,
    /// Cap on the number of distinct queries drawn from the query file
    pub max_queries: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dataset_name: "synthetic".to_string(),
            data_path: PathBuf::from("data/base.bin"),
            query_path: PathBuf::from("data/query.bin"),
            max_elements: 1_000_000,
            begin_num: 0,
            write_batch_size: 100,
            max_queries: 10_000,
        }
    }
}

/// Index type and construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// `"hnsw"` or `"flat"`
    pub index_type: String,
    /// Maximum connections per node
    pub m: usize,
    /// Candidate list size during construction
    pub ef_construction: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_type: "hnsw".to_string(),
            m: 16,
            ef_construction: 200,
        }
    }
}

/// Search parameters forwarded to the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Neighbors requested per query
    pub recall_at: u32,
    /// Candidate list size during search
    pub ef_search: u32,
    /// Beam width (graph indexes that support it)
    pub beam_width: u32,
    /// Pruning slack (Vamana-style indexes)
    pub alpha: f32,
    /// Upper bound on visited nodes, 0 for unbounded
    pub visit_limit: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            recall_at: 10,
            ef_search: 64,
            beam_width: 1,
            alpha: 1.2,
            visit_limit: 0,
        }
    }
}

impl SearchConfig {
    /// Index-level query parameters derived from this section.
    pub fn query_params(&self) -> QueryParams {
        QueryParams {
            ef_search: self.ef_search as usize,
            beam_width: self.beam_width as usize,
            alpha: self.alpha,
            visit_limit: self.visit_limit as usize,
        }
    }
}

/// How inserts and searches are coordinated against the index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Inserts take an exclusive lock, searches a shared one
    #[default]
    Enforced,
    /// No harness-level coordination
    Relaxed,
}

impl std::str::FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enforced" | "strict" => Ok(ConsistencyMode::Enforced),
            "relaxed" | "eventual" => Ok(ConsistencyMode::Relaxed),
            other => Err(format!("unknown consistency mode '{}'", other)),
        }
    }
}

impl std::fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyMode::Enforced => write!(f, "enforced"),
            ConsistencyMode::Relaxed => write!(f, "relaxed"),
        }
    }
}

/// What the consumer pool keeps of each completed search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultRetention {
    /// Keep every `SearchResult` until the run ends
    #[default]
    KeepAll,
    /// Keep only counters
    SummaryOnly,
}

/// Shape of the generated traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Fraction of operations that are inserts, in `(0, 1]`
    pub write_ratio: f64,
    /// Worker count; 0 resolves to available parallelism
    pub num_threads: usize,
    /// Task queue capacity
    pub queue_size: usize,
    /// Search freshly inserted points instead of the query set
    pub query_new_data: bool,
    /// Batches per second per worker; `<= 0` disables rate limiting
    pub input_rate: f64,
    /// Consistency discipline
    pub consistency: ConsistencyMode,
    /// Search result retention policy
    pub result_retention: ResultRetention,
    /// Keep neighbor distances alongside returned tags
    pub record_distances: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            write_ratio: 0.5,
            num_threads: 0,
            queue_size: 64,
            query_new_data: false,
            input_rate: 0.0,
            consistency: ConsistencyMode::Enforced,
            result_retention: ResultRetention::KeepAll,
            record_distances: false,
        }
    }
}

impl WorkloadConfig {
    /// Returns the effective number of workers (resolves 0 to available parallelism)
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Aggregate batch admission rate, or `None` when unlimited.
    pub fn aggregate_rate(&self) -> Option<f64> {
        (self.input_rate > 0.0).then(|| self.input_rate * self.effective_threads() as f64)
    }
}

/// Output locations and recall validation inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResultConfig {
    /// Directory receiving `benchmark_results.csv`
    pub output_dir: PathBuf,
    /// Truth-set file; recall validation is skipped when absent
    pub gt_path: Option<PathBuf>,
    /// Where the serialized search results are written
    pub search_res_path: PathBuf,
    /// Recall scoring executable; recall validation is skipped when absent
    pub recall_tool_path: Option<PathBuf>,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("results"),
            gt_path: None,
            search_res_path: PathBuf::from("results/search_res.bin"),
            recall_tool_path: None,
        }
    }
}

/// Complete configuration of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BenchConfig {
    pub data: DataConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub workload: WorkloadConfig,
    pub result: ResultConfig,
}

impl BenchConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(raw: &str) -> BenchResult<Self> {
        let config: BenchConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the harness relies on.
    pub fn validate(&self) -> BenchResult<()> {
        let ratio = self.workload.write_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(BenchError::Config(format!(
                "write_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        if self.data.write_batch_size == 0 {
            return Err(BenchError::Config("write_batch_size must be positive".into()));
        }
        if self.workload.queue_size == 0 {
            return Err(BenchError::Config("queue_size must be positive".into()));
        }
        if self.search.recall_at == 0 {
            return Err(BenchError::Config("recall_at must be positive".into()));
        }
        if !matches!(self.index.index_type.as_str(), "hnsw" | "flat") {
            return Err(BenchError::Config(format!(
                "unsupported index type '{}'",
                self.index.index_type
            )));
        }
        Ok(())
    }

    /// Whether both recall validation inputs are configured.
    pub fn recall_enabled(&self) -> bool {
        self.result.gt_path.is_some() && self.result.recall_tool_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = BenchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workload.consistency, ConsistencyMode::Enforced);
        assert!(!config.recall_enabled());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BenchConfig::from_json(
            r#"{ "workload": { "write_ratio": 0.25, "consistency": "relaxed" } }"#,
        )
        .unwrap();

        assert_eq!(config.workload.write_ratio, 0.25);
        assert_eq!(config.workload.consistency, ConsistencyMode::Relaxed);
        assert_eq!(config.data.write_batch_size, 100);
        assert_eq!(config.search.recall_at, 10);
    }

    #[test]
    fn test_rejects_bad_write_ratio() {
        for ratio in ["0.0", "1.5", "-0.2"] {
            let raw = format!(r#"{{ "workload": {{ "write_ratio": {} }} }}"#, ratio);
            assert!(matches!(
                BenchConfig::from_json(&raw),
                Err(BenchError::Config(_))
            ));
        }
    }

    #[test]
    fn test_rejects_unknown_index_type() {
        let err = BenchConfig::from_json(r#"{ "index": { "index_type": "ivf" } }"#).unwrap_err();
        assert!(err.to_string().contains("ivf"));
    }

    #[test]
    fn test_aggregate_rate() {
        let mut workload = WorkloadConfig {
            num_threads: 4,
            input_rate: 2.5,
            ..Default::default()
        };
        assert_eq!(workload.aggregate_rate(), Some(10.0));

        workload.input_rate = 0.0;
        assert_eq!(workload.aggregate_rate(), None);
    }

    #[test]
    fn test_consistency_mode_parse() {
        assert_eq!("eventual".parse::<ConsistencyMode>(), Ok(ConsistencyMode::Relaxed));
        assert_eq!("Enforced".parse::<ConsistencyMode>(), Ok(ConsistencyMode::Enforced));
        assert!("sometimes".parse::<ConsistencyMode>().is_err());
    }
}
