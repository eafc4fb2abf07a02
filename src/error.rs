/// Error types for benchmark runs.
///
/// Failures fall into four classes: a single index operation failing (the
/// task is dropped and the worker moves on), rate-limiter cancellation (the
/// producer abandons the batch), pipeline protocol violations (fatal), and
/// recall tool failures (reported, never fatal). All of them are expressed
/// through [`BenchError`]; [`BenchError::is_fatal`] tells the two apart.
use thiserror::Error;

/// Errors raised by an [`AnnIndex`](crate::index::AnnIndex) implementation.
///
/// The harness never inspects these beyond logging them: any error means the
/// batch did not happen.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// A vector did not have the dimension the index was created with
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// Batch payload and tag list differ in length
    #[error("Batch has {vectors} vectors but {tags} tags")]
    LengthMismatch {
        /// Number of vectors supplied
        vectors: usize,
        /// Number of tags supplied
        tags: usize,
    },

    /// The index is full
    #[error("Index capacity of {capacity} points exhausted")]
    Capacity {
        /// Configured maximum number of points
        capacity: usize,
    },

    /// Any other refusal from the index implementation
    #[error("Index rejected operation: {0}")]
    Rejected(String),
}

/// The main error type for the benchmark harness.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration (de)serialization failure
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed dataset or truth-set file
    #[error("Dataset error: {reason}")]
    Dataset {
        /// Description of what is wrong with the file
        reason: String,
    },

    /// The index collaborator failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// The rate limiter was cancelled while waiting for budget
    #[error("Rate limiter cancelled")]
    RateLimited,

    /// A task was enqueued after the queue was closed
    #[error("Enqueue after task queue was closed")]
    QueueClosed,

    /// The task queue was closed twice
    #[error("Task queue closed twice")]
    QueueAlreadyClosed,

    /// The external recall tool could not be run or produced an error
    #[error("Recall tool error: {0}")]
    RecallTool(String),

    /// A spawned task panicked or was aborted
    #[error("Task join error: {0}")]
    Join(String),
}

impl BenchError {
    /// Whether this error indicates a harness bug that must abort the run.
    ///
    /// Only pipeline protocol violations are fatal. Index failures, limiter
    /// cancellation and recall tool problems are logged and the run goes on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BenchError::QueueClosed | BenchError::QueueAlreadyClosed)
    }

    pub(crate) fn dataset(reason: impl Into<String>) -> Self {
        BenchError::Dataset {
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for BenchError {
    fn from(err: tokio::task::JoinError) -> Self {
        BenchError::Join(err.to_string())
    }
}

/// Result type alias for harness operations.
pub type BenchResult<T> = Result<T, BenchError>;
