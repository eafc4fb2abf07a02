//! Flat (brute-force) index.
//!
//! Compares the query against every stored point. O(n) per query, exact
//! results. Used to compute ground truth and as a predictable collaborator
//! in tests.

use super::{AnnIndex, Neighbor, QueryParams, l2_squared};
use crate::error::IndexError;
use dashmap::DashMap;
use std::sync::Arc;

/// A flat (brute-force) vector index keyed by tag.
#[derive(Debug)]
pub struct FlatIndex {
    dimensions: usize,
    /// tag -> vector
    points: DashMap<u32, Arc<[f32]>>,
}

impl FlatIndex {
    /// Create a new empty flat index.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            points: DashMap::new(),
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl AnnIndex for FlatIndex {
    fn name(&self) -> &str {
        "flat"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn insert(&self, vector: &[f32], tag: u32) -> Result<(), IndexError> {
        self.check_dimensions(vector)?;
        self.points.insert(tag, Arc::from(vector));
        Ok(())
    }

    fn set_query_params(&self, _params: QueryParams) {}

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _params: &QueryParams,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimensions(query)?;

        let mut results: Vec<Neighbor> = self
            .points
            .iter()
            .map(|entry| Neighbor {
                tag: *entry.key(),
                distance: l2_squared(query, entry.value()),
            })
            .collect();

        // Closest first, ties broken by tag so results are deterministic
        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.tag.cmp(&b.tag))
        });
        results.truncate(k);

        Ok(results)
    }
}
