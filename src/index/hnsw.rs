//! HNSW (Hierarchical Navigable Small World) index.
//!
//! Graph-based ANN index with O(log n) expected search cost. This is the
//! default collaborator the harness benchmarks: inserts mutate a shared
//! multi-layer graph while searches traverse it, which is exactly the
//! contention the consistency modes are meant to compare.
//!
//! The index is internally synchronized (per-layer `RwLock`s plus a
//! concurrent node map), so it tolerates relaxed mode. Under concurrent
//! inserts the graph may momentarily miss edges that a serial build would
//! have added; that shows up as lower recall, never as a crash.
//!
//! # Example
//!
//! ```ignore
//! use ann_cc_bench::index::{AnnIndex, HnswConfig, HnswIndex, QueryParams};
//!
//! let index = HnswIndex::new(128, HnswConfig::default());
//! index.insert(&vector, 42)?;
//! let neighbors = index.search(&query, 10, &QueryParams::default())?;
//! ```

use super::{AnnIndex, Neighbor, Point, QueryParams, check_batch, l2_squared};
use crate::error::IndexError;
use dashmap::DashMap;
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

const MAX_LAYERS: usize = 16;

/// Configuration for HNSW index.
#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    /// Maximum number of connections per node (default: 16)
    pub m: usize,
    /// Size of dynamic candidate list during construction (default: 200)
    pub ef_construction: usize,
    /// Size of dynamic candidate list during search (default: 50)
    pub ef_search: usize,
    /// Probability decay factor for layer assignment (default: 1.0 / ln(M))
    pub m_l: f64,
    /// Maximum number of points, 0 for unbounded
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::with_m(16)
    }
}

impl HnswConfig {
    /// Create a new config with custom M.
    pub fn with_m(m: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            ef_construction: 200,
            ef_search: 50,
            m_l: 1.0 / (m as f64).ln(),
            max_elements: 0,
        }
    }

    /// Set ef_construction.
    pub fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    /// Set ef_search.
    pub fn ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    /// Set the capacity.
    pub fn max_elements(mut self, n: usize) -> Self {
        self.max_elements = n;
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    vector: Point,
    max_layer: usize,
}

/// Adjacency lists of one layer.
#[derive(Debug, Default)]
struct Layer {
    edges: HashMap<u32, Vec<u32>>,
}

impl Layer {
    fn add_edge(&mut self, from: u32, to: u32) {
        let neighbors = self.edges.entry(from).or_default();
        if !neighbors.contains(&to) {
            neighbors.push(to);
        }
    }

    fn neighbors(&self, tag: u32) -> Vec<u32> {
        self.edges.get(&tag).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    tag: u32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

/// HNSW (Hierarchical Navigable Small World) index with `u32` tags.
pub struct HnswIndex {
    config: HnswConfig,
    dimensions: usize,
    nodes: DashMap<u32, Node>,
    layers: Vec<RwLock<Layer>>,
    /// (tag, layer) of the node searches start from
    entry_point: RwLock<Option<(u32, usize)>>,
    /// Search `ef` set through `set_query_params`
    ef_search: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("config", &self.config)
            .field("dimensions", &self.dimensions)
            .field("num_nodes", &self.nodes.len())
            .field("entry_point", &*read(&self.entry_point))
            .finish()
    }
}

// Lock helpers: a panicked writer leaves the graph usable, so poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl HnswIndex {
    /// Create a new HNSW index for vectors of the given dimension.
    pub fn new(dimensions: usize, config: HnswConfig) -> Self {
        let layers = (0..MAX_LAYERS).map(|_| RwLock::new(Layer::default())).collect();

        Self {
            config,
            dimensions,
            nodes: DashMap::new(),
            layers,
            entry_point: RwLock::new(None),
            ef_search: AtomicUsize::new(config.ef_search),
            rng: Mutex::new(StdRng::seed_from_u64(42)),
        }
    }

    /// Assign a random layer to a new node.
    fn random_layer(&self) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let uniform = Uniform::from(0.0..1.0);
        let r: f64 = uniform.sample(&mut *rng);
        let level = (-r.ln() * self.config.m_l).floor();
        if level.is_finite() {
            (level as usize).min(MAX_LAYERS - 1)
        } else {
            MAX_LAYERS - 1
        }
    }

    /// Copy out a node's vector without holding the map guard.
    fn vector_of(&self, tag: u32) -> Option<Point> {
        self.nodes.get(&tag).map(|node| node.vector.clone())
    }

    fn distance_to(&self, tag: u32, query: &[f32]) -> Option<f32> {
        self.vector_of(tag).map(|v| l2_squared(&v, query))
    }

    /// Best-first search of one layer, returning up to `ef` candidates sorted closest first.
    fn search_layer(&self, entry: u32, query: &[f32], ef: usize, layer: usize) -> Vec<Candidate> {
        let entry_dist = match self.distance_to(entry, query) {
            Some(d) => d,
            None => return Vec::new(),
        };

        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut best = BinaryHeap::new();

        let start = Candidate {
            distance: entry_dist,
            tag: entry,
        };
        visited.insert(entry);
        candidates.push(Reverse(start));
        best.push(start);

        while let Some(Reverse(curr)) = candidates.pop() {
            let worst = best.peek().map(|c: &Candidate| c.distance).unwrap_or(f32::MAX);
            if curr.distance > worst && best.len() >= ef {
                break;
            }

            let neighbors = read(&self.layers[layer]).neighbors(curr.tag);

            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(dist) = self.distance_to(neighbor, query) else {
                    continue;
                };

                let worst = best.peek().map(|c| c.distance).unwrap_or(f32::MAX);
                if best.len() < ef || dist < worst {
                    let cand = Candidate {
                        distance: dist,
                        tag: neighbor,
                    };
                    candidates.push(Reverse(cand));
                    best.push(cand);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        best.into_sorted_vec()
    }

    /// Greedy descent through the upper layers.
    fn descend(&self, mut entry: u32, query: &[f32], from: usize, to: usize) -> u32 {
        for layer in ((to + 1)..=from).rev() {
            if let Some(closest) = self.search_layer(entry, query, 1, layer).first() {
                entry = closest.tag;
            }
        }
        entry
    }

    fn connect(&self, layer: usize, a: u32, b: u32) {
        let mut guard = write(&self.layers[layer]);
        guard.add_edge(a, b);
        guard.add_edge(b, a);
    }

    /// Keep only the closest `2 * M` neighbors of `tag` in `layer`.
    fn prune_connections(&self, layer: usize, tag: u32) {
        let max_connections = self.config.m * 2;
        let neighbors = read(&self.layers[layer]).neighbors(tag);
        if neighbors.len() <= max_connections {
            return;
        }
        let Some(base) = self.vector_of(tag) else {
            return;
        };

        let mut scored: Vec<Candidate> = neighbors
            .into_iter()
            .filter_map(|n| {
                self.distance_to(n, &base).map(|distance| Candidate { distance, tag: n })
            })
            .collect();
        scored.sort();
        scored.truncate(max_connections);

        write(&self.layers[layer])
            .edges
            .insert(tag, scored.into_iter().map(|c| c.tag).collect());
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

impl AnnIndex for HnswIndex {
    fn name(&self) -> &str {
        "hnsw"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn insert(&self, vector: &[f32], tag: u32) -> Result<(), IndexError> {
        self.check_dimensions(vector)?;
        if self.config.max_elements > 0
            && self.nodes.len() >= self.config.max_elements
            && !self.nodes.contains_key(&tag)
        {
            return Err(IndexError::Capacity {
                capacity: self.config.max_elements,
            });
        }

        let layer = self.random_layer();
        let point: Point = Point::from(vector);
        self.nodes.insert(
            tag,
            Node {
                vector: point.clone(),
                max_layer: layer,
            },
        );

        // Claim or read the entry point atomically
        let (entry, entry_layer) = {
            let mut ep = write(&self.entry_point);
            match *ep {
                None => {
                    *ep = Some((tag, layer));
                    return Ok(());
                }
                Some((ep_tag, ep_layer)) => {
                    if layer > ep_layer {
                        *ep = Some((tag, layer));
                    }
                    (ep_tag, ep_layer)
                }
            }
        };
        if entry == tag {
            return Ok(());
        }

        let mut curr = self.descend(entry, &point, entry_layer, layer);

        for lc in (0..=layer.min(entry_layer)).rev() {
            let neighbors = self.search_layer(curr, &point, self.config.ef_construction, lc);

            for neighbor in neighbors.iter().filter(|c| c.tag != tag).take(self.config.m) {
                self.connect(lc, tag, neighbor.tag);
                self.prune_connections(lc, neighbor.tag);
            }

            if let Some(closest) = neighbors.iter().find(|c| c.tag != tag) {
                curr = closest.tag;
            }
        }

        Ok(())
    }

    fn batch_insert(&self, vectors: &[Point], tags: &[u32]) -> Result<(), IndexError> {
        check_batch(vectors, tags)?;
        for (vector, &tag) in vectors.iter().zip(tags) {
            self.insert(vector, tag)?;
        }
        Ok(())
    }

    fn set_query_params(&self, params: QueryParams) {
        if params.ef_search > 0 {
            self.ef_search.store(params.ef_search, AtomicOrdering::Relaxed);
        }
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &QueryParams,
    ) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimensions(query)?;

        let Some((entry, entry_layer)) = *read(&self.entry_point) else {
            return Ok(Vec::new());
        };

        let ef = if params.ef_search > 0 {
            params.ef_search
        } else {
            self.ef_search.load(AtomicOrdering::Relaxed)
        }
        .max(k);

        let curr = self.descend(entry, query, entry_layer, 0);
        let mut results = self.search_layer(curr, query, ef, 0);
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|c| Neighbor {
                tag: c.tag,
                distance: c.distance,
            })
            .collect())
    }
}
