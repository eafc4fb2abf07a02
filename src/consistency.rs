//! Consistency disciplines for workers touching the index.
//!
//! A discipline is chosen once per run and handed to every worker. Workers ask
//! it for an [`AccessPermit`] before running an insert or a search and drop
//! the permit when the index call returns, which ends the critical section.
//!
//! ```ignore
//! let discipline = discipline_for(ConsistencyMode::Enforced);
//! let permit = discipline.before_insert().await;
//! tokio::task::spawn_blocking(move || {
//!     let _permit = permit;
//!     index.batch_insert(&vectors, &tags)
//! });
//! ```

use crate::config::ConsistencyMode;
use crate::task::TaskKind;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Proof that a worker may run an index operation.
///
/// Owned so it can move into a blocking task; dropping it releases whatever
/// the discipline acquired.
#[derive(Debug)]
#[must_use = "the critical section ends when the permit is dropped"]
pub struct AccessPermit {
    guard: Guard,
}

#[derive(Debug)]
enum Guard {
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Unguarded,
}

impl AccessPermit {
    /// No other permit of any kind is outstanding.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.guard, Guard::Exclusive(_))
    }

    /// Only other shared permits may be outstanding.
    pub fn is_shared(&self) -> bool {
        matches!(self.guard, Guard::Shared(_))
    }

    /// The discipline coordinates nothing.
    pub fn is_unguarded(&self) -> bool {
        matches!(self.guard, Guard::Unguarded)
    }
}

/// Coordination strategy between inserts and searches.
#[async_trait]
pub trait ConsistencyDiscipline: Send + Sync + std::fmt::Debug {
    /// Mode this discipline implements.
    fn mode(&self) -> ConsistencyMode;

    /// Wait until an insert may run.
    async fn before_insert(&self) -> AccessPermit;

    /// Wait until a search may run.
    async fn before_search(&self) -> AccessPermit;

    /// Permit for a task of `kind`.
    async fn before(&self, kind: TaskKind) -> AccessPermit {
        match kind {
            TaskKind::Insert => self.before_insert().await,
            TaskKind::Search => self.before_search().await,
        }
    }
}

/// Single writer, many readers over one pool-wide lock.
///
/// tokio's `RwLock` queues waiters fairly, so a steady stream of searches
/// cannot starve inserts.
#[derive(Debug, Default)]
pub struct EnforcedConsistency {
    lock: Arc<RwLock<()>>,
}

impl EnforcedConsistency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsistencyDiscipline for EnforcedConsistency {
    fn mode(&self) -> ConsistencyMode {
        ConsistencyMode::Enforced
    }

    async fn before_insert(&self) -> AccessPermit {
        AccessPermit {
            guard: Guard::Exclusive(self.lock.clone().write_owned().await),
        }
    }

    async fn before_search(&self) -> AccessPermit {
        AccessPermit {
            guard: Guard::Shared(self.lock.clone().read_owned().await),
        }
    }
}

/// No harness-level coordination; the index must tolerate concurrent use.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelaxedConsistency;

#[async_trait]
impl ConsistencyDiscipline for RelaxedConsistency {
    fn mode(&self) -> ConsistencyMode {
        ConsistencyMode::Relaxed
    }

    async fn before_insert(&self) -> AccessPermit {
        AccessPermit {
            guard: Guard::Unguarded,
        }
    }

    async fn before_search(&self) -> AccessPermit {
        AccessPermit {
            guard: Guard::Unguarded,
        }
    }
}

/// Build the discipline for a configured mode.
pub fn discipline_for(mode: ConsistencyMode) -> Arc<dyn ConsistencyDiscipline> {
    match mode {
        ConsistencyMode::Enforced => Arc::new(EnforcedConsistency::new()),
        ConsistencyMode::Relaxed => Arc::new(RelaxedConsistency),
    }
}
