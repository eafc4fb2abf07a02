//! Recall validation.
//!
//! After the timed run the full query set is searched once more, the neighbor
//! tags are written in the result-file layout and handed to an external
//! scoring tool, whose textual output is parsed for the recall percentage.
//! The same module provides the codecs and the scoring routine that the
//! bundled `calc_recall` tool is built from.
//!
//! Result file: `i32 n`, `i32 k`, then `n × k` `u32` tags, little-endian,
//! row-major. Truth-set file: the same header and ids, optionally followed by
//! `n × k` `f32` distances.

use crate::config::BenchConfig;
use crate::dataset::VectorSet;
use crate::error::{BenchError, BenchResult};
use crate::index::{AnnIndex, FlatIndex, QueryParams, tags_of};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Placeholder for rows shorter than `k` in a result file.
pub const MISSING_TAG: u32 = u32::MAX;

static RECALL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)recall@(\d+)\s*=\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*%")
        .expect("recall pattern is valid")
});

// ---------------------------------------------------------------------------
// Result file
// ---------------------------------------------------------------------------

/// Encode neighbor rows as a result file with `k` columns.
///
/// Short rows are padded with [`MISSING_TAG`], long rows truncated.
pub fn encode_results(rows: &[Vec<u32>], k: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 4 * rows.len() * k);
    out.extend_from_slice(&(rows.len() as i32).to_le_bytes());
    out.extend_from_slice(&(k as i32).to_le_bytes());
    for row in rows {
        for j in 0..k {
            let tag = row.get(j).copied().unwrap_or(MISSING_TAG);
            out.extend_from_slice(&tag.to_le_bytes());
        }
    }
    out
}

/// Decode a result file into rows.
pub fn decode_results(bytes: &[u8]) -> BenchResult<Vec<Vec<u32>>> {
    let (n, k) = read_header(bytes)?;
    let expected = payload_len(n, k, 1)?;
    if bytes.len() != expected {
        return Err(BenchError::dataset(format!(
            "result file should be {} bytes for {} x {}, found {}",
            expected,
            n,
            k,
            bytes.len()
        )));
    }
    Ok(read_u32_rows(&bytes[8..], n, k))
}

pub fn write_results(path: impl AsRef<Path>, rows: &[Vec<u32>], k: usize) -> BenchResult<()> {
    write_file(path.as_ref(), &encode_results(rows, k))
}

pub fn read_results(path: impl AsRef<Path>) -> BenchResult<Vec<Vec<u32>>> {
    decode_results(&std::fs::read(path)?)
}

// ---------------------------------------------------------------------------
// Truth set
// ---------------------------------------------------------------------------

/// Exact neighbors of every query.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthSet {
    /// Neighbors stored per query
    pub k: usize,
    pub ids: Vec<Vec<u32>>,
    /// Distances parallel to `ids`, when the file carries them
    pub distances: Option<Vec<Vec<f32>>>,
}

impl TruthSet {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn from_bytes(bytes: &[u8]) -> BenchResult<Self> {
        let (n, k) = read_header(bytes)?;
        let ids_len = payload_len(n, k, 1)?;
        let with_distances = payload_len(n, k, 2)?;

        let distances = if bytes.len() == with_distances {
            let raw = read_u32_rows(&bytes[ids_len..], n, k);
            Some(
                raw.into_iter()
                    .map(|row| row.into_iter().map(f32::from_bits).collect())
                    .collect(),
            )
        } else if bytes.len() == ids_len {
            None
        } else {
            return Err(BenchError::dataset(format!(
                "truth set of {} x {} should be {} or {} bytes, found {}",
                n,
                k,
                ids_len,
                with_distances,
                bytes.len()
            )));
        };

        Ok(Self {
            k,
            ids: read_u32_rows(&bytes[8..ids_len], n, k),
            distances,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = encode_results(&self.ids, self.k);
        if let Some(distances) = &self.distances {
            for row in distances {
                for j in 0..self.k {
                    let d = row.get(j).copied().unwrap_or(f32::INFINITY);
                    out.extend_from_slice(&d.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let truth = Self::from_bytes(&bytes)?;
        tracing::debug!(path = %path.display(), queries = truth.len(), k = truth.k, "Loaded truth set");
        Ok(truth)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> BenchResult<()> {
        write_file(path.as_ref(), &self.to_bytes())
    }
}

/// Exact `k` nearest neighbors of each query among `base`, tagged by offset.
pub fn compute_ground_truth(base: &VectorSet, queries: &VectorSet, k: usize) -> BenchResult<TruthSet> {
    if base.dimensions() != queries.dimensions() {
        return Err(BenchError::dataset(format!(
            "base has dimension {} but queries have {}",
            base.dimensions(),
            queries.dimensions()
        )));
    }

    let index = FlatIndex::new(base.dimensions());
    let tags: Vec<u32> = (0..base.len() as u32).collect();
    index.build(base.points(), &tags)?;

    let found = index.batch_search(queries.points(), k, &QueryParams::default())?;
    let k = k.min(base.len());
    Ok(TruthSet {
        k,
        ids: found.iter().map(|row| tags_of(row)).collect(),
        distances: Some(
            found
                .iter()
                .map(|row| row.iter().map(|n| n.distance).collect())
                .collect(),
        ),
    })
}

/// Recall of `results` against `truth`, as a percentage.
///
/// For each query the relevant set is the first `recall_at` truth ids,
/// extended over ids whose distance ties the `recall_at`-th one. Hits among
/// the first `recall_at` results are summed and normalised by
/// `queries × recall_at`.
pub fn calculate_recall(truth: &TruthSet, results: &[Vec<u32>], recall_at: usize) -> BenchResult<f64> {
    if recall_at == 0 || recall_at > truth.k {
        return Err(BenchError::dataset(format!(
            "recall@{} needs between 1 and {} truth neighbors",
            recall_at, truth.k
        )));
    }
    if results.len() > truth.len() {
        return Err(BenchError::dataset(format!(
            "{} result rows but only {} truth rows",
            results.len(),
            truth.len()
        )));
    }
    if results.is_empty() {
        return Ok(0.0);
    }

    let mut hits = 0usize;
    for (i, row) in results.iter().enumerate() {
        let gt = &truth.ids[i];
        let mut cutoff = recall_at;
        if let Some(distances) = &truth.distances {
            let boundary = distances[i][recall_at - 1];
            while cutoff < truth.k && distances[i][cutoff] == boundary {
                cutoff += 1;
            }
        }
        let relevant: HashSet<u32> = gt[..cutoff].iter().copied().collect();
        hits += row
            .iter()
            .take(recall_at)
            .filter(|tag| relevant.contains(tag))
            .count();
    }

    Ok(hits as f64 / results.len() as f64 * 100.0 / recall_at as f64)
}

/// Find the first `recall@K = X%` in tool output.
pub fn parse_recall(output: &str) -> Option<(u32, f64)> {
    let caps = RECALL_LINE.captures(output)?;
    let k = caps.get(1)?.as_str().parse().ok()?;
    let pct = caps.get(2)?.as_str().parse().ok()?;
    Some((k, pct))
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Post-run recall check through an external scoring tool.
#[derive(Debug, Clone)]
pub struct RecallValidator {
    pub gt_path: PathBuf,
    pub tool_path: PathBuf,
    pub result_path: PathBuf,
    pub recall_at: u32,
    pub params: QueryParams,
}

impl RecallValidator {
    /// Validator for `config`, or `None` when recall is not configured.
    pub fn from_config(config: &BenchConfig) -> Option<Self> {
        let gt_path = config.result.gt_path.clone()?;
        let tool_path = config.result.recall_tool_path.clone()?;
        Some(Self {
            gt_path,
            tool_path,
            result_path: config.result.search_res_path.clone(),
            recall_at: config.search.recall_at,
            params: config.search.query_params(),
        })
    }

    /// Search every query, score the results and return the recall percentage.
    ///
    /// Output without a recall line yields `0.0` with a warning; failure to
    /// run the tool, or a non-zero exit, is an error.
    pub async fn validate(&self, index: Arc<dyn AnnIndex>, queries: Arc<VectorSet>) -> BenchResult<f64> {
        let k = self.recall_at as usize;
        let params = self.params;
        let rows = tokio::task::spawn_blocking(move || {
            index
                .batch_search(queries.points(), k, &params)
                .map(|found| found.iter().map(|row| tags_of(row)).collect::<Vec<_>>())
        })
        .await??;

        if let Some(parent) = self.result_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.result_path, encode_results(&rows, k)).await?;
        tracing::info!(
            queries = rows.len(),
            path = %self.result_path.display(),
            "Wrote search results for recall validation"
        );

        let output = tokio::process::Command::new(&self.tool_path)
            .arg(&self.gt_path)
            .arg(&self.result_path)
            .arg(self.recall_at.to_string())
            .output()
            .await
            .map_err(|e| {
                BenchError::RecallTool(format!("cannot run {}: {}", self.tool_path.display(), e))
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(BenchError::RecallTool(format!(
                "{} exited with {}: {}",
                self.tool_path.display(),
                output.status,
                combined.trim()
            )));
        }

        match parse_recall(&combined) {
            Some((reported_k, recall)) => {
                if reported_k != self.recall_at {
                    tracing::warn!(requested = self.recall_at, reported_k, "Recall tool reported a different k");
                }
                Ok(recall)
            }
            None => {
                tracing::warn!(output = %combined.trim(), "No recall value in tool output, reporting 0");
                Ok(0.0)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_header(bytes: &[u8]) -> BenchResult<(usize, usize)> {
    if bytes.len() < 8 {
        return Err(BenchError::dataset("file too short for header"));
    }
    let n = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let k = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if n < 0 || k < 0 {
        return Err(BenchError::dataset(format!("invalid header {} x {}", n, k)));
    }
    Ok((n as usize, k as usize))
}

/// Header plus `copies` matrices of `n x k` 4-byte values.
fn payload_len(n: usize, k: usize, copies: usize) -> BenchResult<usize> {
    n.checked_mul(k)
        .and_then(|cells| cells.checked_mul(4 * copies))
        .and_then(|body| body.checked_add(8))
        .ok_or_else(|| BenchError::dataset(format!("header {} x {} overflows file size", n, k)))
}

fn read_u32_rows(bytes: &[u8], n: usize, k: usize) -> Vec<Vec<u32>> {
    let values: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if k == 0 {
        return vec![Vec::new(); n];
    }
    values.chunks(k).take(n).map(|row| row.to_vec()).collect()
}

fn write_file(path: &Path, bytes: &[u8]) -> BenchResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}
