//! The index collaborator.
//!
//! The harness drives any type implementing [`AnnIndex`]. The trait is the
//! narrow contract a benchmarked index has to honour: bulk build, point and
//! batch inserts, point and batch searches, and an index-wide query
//! parameter hook. Implementations may or may not be internally
//! thread-safe; the harness only relies on `Send + Sync` so the value can be
//! shared, and protects it with a
//! [`ConsistencyDiscipline`](crate::consistency::ConsistencyDiscipline) when
//! it cannot vouch for concurrent mutation.
//!
//! Two implementations ship with the crate:
//! - [`HnswIndex`]: a graph index for realistic insert/search contention
//! - [`FlatIndex`]: exact brute-force search, used for ground truth

mod flat;
mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::{HnswConfig, HnswIndex};

use crate::error::IndexError;
use std::sync::Arc;

/// A fixed-dimension vector shared between the dataset, tasks and indexes.
pub type Point = Arc<[f32]>;

/// Search-quality knobs forwarded opaquely to the index.
///
/// A zero value means "use the index's own setting".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueryParams {
    /// Candidate list size (HNSW `ef`, DiskANN `L`)
    pub ef_search: usize,
    /// Beam width for beam-search graph indexes
    pub beam_width: usize,
    /// Pruning slack for Vamana-style indexes
    pub alpha: f32,
    /// Maximum number of visited nodes, 0 for unbounded
    pub visit_limit: usize,
}

/// One returned neighbor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Tag the point was inserted under
    pub tag: u32,
    /// Squared L2 distance to the query
    pub distance: f32,
}

/// Contract of a mutable approximate-nearest-neighbor index.
///
/// Every fallible operation returns `Err` to signal that the batch did not
/// happen. Empty inputs are no-ops.
pub trait AnnIndex: Send + Sync {
    /// Name used in reports (e.g. `"hnsw"`).
    fn name(&self) -> &str;

    /// Dimension every vector must have.
    fn dimensions(&self) -> usize;

    /// Number of points currently indexed.
    fn len(&self) -> usize;

    /// Check if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a single point.
    fn insert(&self, vector: &[f32], tag: u32) -> Result<(), IndexError>;

    /// Insert a batch of points; `vectors` and `tags` are paired by position.
    fn batch_insert(&self, vectors: &[Point], tags: &[u32]) -> Result<(), IndexError> {
        check_batch(vectors, tags)?;
        for (vector, &tag) in vectors.iter().zip(tags) {
            self.insert(vector, tag)?;
        }
        Ok(())
    }

    /// Bulk initial load before the timed run.
    fn build(&self, vectors: &[Point], tags: &[u32]) -> Result<(), IndexError> {
        self.batch_insert(vectors, tags)
    }

    /// Apply index-wide search configuration.
    fn set_query_params(&self, params: QueryParams);

    /// Return up to `k` neighbors of `query`, closest first.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &QueryParams,
    ) -> Result<Vec<Neighbor>, IndexError>;

    /// Search every query in `queries`; one neighbor list per query, in order.
    fn batch_search(
        &self,
        queries: &[Point],
        k: usize,
        params: &QueryParams,
    ) -> Result<Vec<Vec<Neighbor>>, IndexError> {
        queries
            .iter()
            .map(|query| self.search(query, k, params))
            .collect()
    }
}

/// Validate the pairing of a batch.
pub(crate) fn check_batch(vectors: &[Point], tags: &[u32]) -> Result<(), IndexError> {
    if vectors.len() != tags.len() {
        return Err(IndexError::LengthMismatch {
            vectors: vectors.len(),
            tags: tags.len(),
        });
    }
    Ok(())
}

/// Squared Euclidean distance.
#[inline]
pub(crate) fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Strip distances from a neighbor list.
pub fn tags_of(neighbors: &[Neighbor]) -> Vec<u32> {
    neighbors.iter().map(|n| n.tag).collect()
}
