//! Vector datasets.
//!
//! Files use the aligned binary layout shared by most ANN benchmark suites:
//! little-endian `i32` point count, `i32` dimension, then `count × dim` `f32`
//! values, row-major.

use crate::error::{BenchError, BenchResult};
use crate::index::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const HEADER_LEN: usize = 8;

/// An immutable, fixed-dimension set of points.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSet {
    dimensions: usize,
    points: Vec<Point>,
}

impl VectorSet {
    /// Wrap already-materialized points; every point must have `dimensions` values.
    pub fn new(dimensions: usize, points: Vec<Point>) -> BenchResult<Self> {
        if let Some((i, p)) = points.iter().enumerate().find(|(_, p)| p.len() != dimensions) {
            return Err(BenchError::dataset(format!(
                "point {} has dimension {}, expected {}",
                i,
                p.len(),
                dimensions
            )));
        }
        Ok(Self { dimensions, points })
    }

    /// Uniform random points in `[-1, 1)^dim`, reproducible for a given seed.
    pub fn synthetic(count: usize, dimensions: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let points = (0..count)
            .map(|_| {
                Point::from(
                    (0..dimensions)
                        .map(|_| rng.r#gen::<f32>() * 2.0 - 1.0)
                        .collect::<Vec<f32>>(),
                )
            })
            .collect();
        Self { dimensions, points }
    }

    /// Decode the aligned binary layout.
    pub fn from_bytes(bytes: &[u8]) -> BenchResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(BenchError::dataset(format!(
                "file too short for header ({} bytes)",
                bytes.len()
            )));
        }
        let count = read_i32(bytes, 0);
        let dimensions = read_i32(bytes, 4);
        if count < 0 || dimensions <= 0 {
            return Err(BenchError::dataset(format!(
                "invalid header: {} points of dimension {}",
                count, dimensions
            )));
        }
        let (count, dimensions) = (count as usize, dimensions as usize);

        let expected = count
            .checked_mul(dimensions)
            .and_then(|cells| cells.checked_mul(4))
            .and_then(|body| body.checked_add(HEADER_LEN))
            .ok_or_else(|| {
                BenchError::dataset(format!(
                    "header {} x {} overflows file size",
                    count, dimensions
                ))
            })?;
        if bytes.len() != expected {
            return Err(BenchError::dataset(format!(
                "expected {} bytes for {} x {} vectors, found {}",
                expected,
                count,
                dimensions,
                bytes.len()
            )));
        }

        let points = bytes[HEADER_LEN..]
            .chunks_exact(4 * dimensions)
            .map(|row| {
                Point::from(
                    row.chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect::<Vec<f32>>(),
                )
            })
            .collect();
        Ok(Self { dimensions, points })
    }

    /// Encode into the aligned binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 4 * self.points.len() * self.dimensions);
        out.extend_from_slice(&(self.points.len() as i32).to_le_bytes());
        out.extend_from_slice(&(self.dimensions as i32).to_le_bytes());
        for point in &self.points {
            for v in point.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Read a `.bin` file.
    pub fn load_bin(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let set = Self::from_bytes(&bytes).map_err(|e| match e {
            BenchError::Dataset { reason } => {
                BenchError::dataset(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;
        tracing::info!(
            path = %path.display(),
            points = set.len(),
            dimensions = set.dimensions,
            "Loaded dataset"
        );
        Ok(set)
    }

    /// Write a `.bin` file, creating parent directories.
    pub fn write_bin(&self, path: impl AsRef<Path>) -> BenchResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn get(&self, offset: usize) -> Option<&Point> {
        self.points.get(offset)
    }

    /// Keep only the first `n` points.
    pub fn truncate(&mut self, n: usize) {
        self.points.truncate(n);
    }
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = VectorSet::synthetic(20, 8, 42);
        let b = VectorSet::synthetic(20, 8, 42);
        let c = VectorSet::synthetic(20, 8, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 20);
        assert!(a.points().iter().all(|p| p.len() == 8));
        assert!(a.points().iter().flat_map(|p| p.iter()).all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_bin_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/base.bin");
        let set = VectorSet::synthetic(5, 3, 7);

        set.write_bin(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 + 4 * 5 * 3);
        assert_eq!(VectorSet::load_bin(&path).unwrap(), set);
    }

    #[test]
    fn test_rejects_size_mismatch() {
        let mut bytes = VectorSet::synthetic(4, 2, 1).to_bytes();
        bytes.pop();
        let err = VectorSet::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, BenchError::Dataset { .. }));
        assert!(err.to_string().contains("expected 40 bytes"));
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(VectorSet::from_bytes(&[1, 0, 0]).is_err());

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(VectorSet::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_rejects_oversized_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let err = VectorSet::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, BenchError::Dataset { .. }));
    }

    #[test]
    fn test_new_checks_dimensions() {
        let points: Vec<Point> = vec![Point::from(vec![1.0f32, 2.0]), Point::from(vec![3.0f32])];
        assert!(VectorSet::new(2, points).is_err());
    }

    #[test]
    fn test_empty_set() {
        let set = VectorSet::from_bytes(&VectorSet::synthetic(0, 4, 0).to_bytes()).unwrap();
        assert!(set.is_empty());
        assert_eq!(set.dimensions(), 4);
    }
}
