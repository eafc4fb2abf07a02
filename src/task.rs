//! Units of work flowing through the pipeline.

use crate::index::{Point, QueryParams};
use chrono::{DateTime, Utc};

/// What a task asks the index to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Insert,
    Search,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Insert => write!(f, "insert"),
            TaskKind::Search => write!(f, "search"),
        }
    }
}

/// Parameters carried by search tasks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SearchParams {
    /// Neighbors requested per query
    pub recall_at: u32,
    /// Index-specific knobs, forwarded untouched
    pub query: QueryParams,
}

/// A batch of vectors plus their tags.
///
/// For inserts the tag is the identifier to assign; for searches it names the
/// query the vector came from. `vectors` and `tags` always have the same,
/// non-zero length: constructors return `None` otherwise, so empty batches
/// are dropped before they reach the queue.
#[derive(Debug, Clone)]
pub struct Task {
    kind: TaskKind,
    vectors: Vec<Point>,
    tags: Vec<u32>,
    search: Option<SearchParams>,
    /// Enqueue time, for diagnostics only
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Build an insert task.
    pub fn insert(vectors: Vec<Point>, tags: Vec<u32>) -> Option<Self> {
        Self::new(TaskKind::Insert, vectors, tags, None)
    }

    /// Build a search task.
    pub fn search(vectors: Vec<Point>, tags: Vec<u32>, params: SearchParams) -> Option<Self> {
        Self::new(TaskKind::Search, vectors, tags, Some(params))
    }

    fn new(
        kind: TaskKind,
        vectors: Vec<Point>,
        tags: Vec<u32>,
        search: Option<SearchParams>,
    ) -> Option<Self> {
        if vectors.is_empty() || vectors.len() != tags.len() {
            return None;
        }
        Some(Self {
            kind,
            vectors,
            tags,
            search,
            submitted_at: Utc::now(),
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn vectors(&self) -> &[Point] {
        &self.vectors
    }

    pub fn tags(&self) -> &[u32] {
        &self.tags
    }

    /// Search parameters; `None` for inserts.
    pub fn search_params(&self) -> Option<&SearchParams> {
        self.search.as_ref()
    }

    /// Number of points in the batch.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Always false for a constructed task.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Stamp the task with the current time.
    pub(crate) fn stamp(&mut self) {
        self.submitted_at = Utc::now();
    }
}

/// Outcome of one query in a completed search task.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Points inserted when this result was created.
    ///
    /// Best-effort: across workers it is only causally meaningful in enforced
    /// mode, and even then it reflects completed inserts, not a watermark.
    pub insert_offset_snapshot: u64,
    /// Position of the query within its batch
    pub query_index: u32,
    /// Tag of the query (dataset offset or query-set index)
    pub query_tag: u32,
    /// Neighbor tags, closest first, at most `recall_at` long
    pub returned_tags: Vec<u32>,
    /// Distances parallel to `returned_tags`; empty when not recorded
    pub distances: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> Point {
        Point::from(vec![x, x])
    }

    #[test]
    fn test_empty_task_is_dropped() {
        assert!(Task::insert(Vec::new(), Vec::new()).is_none());
        assert!(Task::search(Vec::new(), Vec::new(), SearchParams::default()).is_none());
    }

    #[test]
    fn test_mismatched_task_is_dropped() {
        assert!(Task::insert(vec![point(1.0), point(2.0)], vec![1]).is_none());
    }

    #[test]
    fn test_task_accessors() {
        let params = SearchParams {
            recall_at: 10,
            ..Default::default()
        };
        let task = Task::search(vec![point(1.0)], vec![9], params).unwrap();
        assert_eq!(task.kind(), TaskKind::Search);
        assert_eq!(task.len(), 1);
        assert_eq!(task.tags(), &[9]);
        assert_eq!(task.search_params().map(|p| p.recall_at), Some(10));

        let insert = Task::insert(vec![point(0.5)], vec![3]).unwrap();
        assert!(insert.search_params().is_none());
        assert_eq!(insert.kind().to_string(), "insert");
    }
}
