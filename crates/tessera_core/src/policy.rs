//! Deletion policies decide which historical commits may be removed.
//!
//! A policy sees the full list of commits, oldest first, when a writer (or a
//! committing reader) starts and after every new commit. It marks commits
//! with [`IndexCommit::delete`]; the file deleter does the rest, deferring
//! removal of commits an open reader still holds.

use crate::commit::{now_millis, IndexCommit};
use crate::error::{CoreError, CoreResult};
use crate::types::Generation;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Decides which commits to delete.
///
/// Implementations use interior mutability for any bookkeeping; the engine
/// shares one policy instance between writers and readers.
pub trait DeletionPolicy: Send + Sync + fmt::Debug {
    /// Called once when a writer opens, or a reader first commits, with
    /// every commit currently in the directory.
    ///
    /// # Errors
    ///
    /// An error aborts the open.
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()>;

    /// Called after each new commit is durably published. The new commit is
    /// always last and must not be deleted.
    ///
    /// # Errors
    ///
    /// An error is reported to the committer; the commit itself stands.
    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()>;
}

/// Never deletes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAllDeletionPolicy;

impl DeletionPolicy for KeepAllDeletionPolicy {
    fn on_init(&self, _commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        Ok(())
    }

    fn on_commit(&self, _commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        Ok(())
    }
}

/// Keeps only the newest commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOnlyLastCommitDeletionPolicy;

impl DeletionPolicy for KeepOnlyLastCommitDeletionPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.on_commit(commits)
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        if let Some((_, older)) = commits.split_last() {
            older.iter().for_each(|c| c.delete());
        }
        Ok(())
    }
}

/// Keeps the `n` newest commits.
#[derive(Debug, Clone, Copy)]
pub struct KeepLastNDeletionPolicy {
    n: usize,
}

impl KeepLastNDeletionPolicy {
    /// Creates a policy keeping `n` commits; `n` is raised to at least one.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n: n.max(1) }
    }

    /// Returns how many commits are kept.
    #[must_use]
    pub fn keep(&self) -> usize {
        self.n
    }

    fn apply(&self, commits: &[Arc<IndexCommit>]) {
        let excess = commits.len().saturating_sub(self.n);
        commits[..excess].iter().for_each(|c| c.delete());
    }
}

impl DeletionPolicy for KeepLastNDeletionPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.apply(commits);
        Ok(())
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.apply(commits);
        Ok(())
    }
}

/// Deletes commits whose file is older than a threshold, except the newest.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationTimeDeletionPolicy {
    expiration: Duration,
}

impl ExpirationTimeDeletionPolicy {
    /// Creates a policy expiring commits older than `expiration`.
    #[must_use]
    pub const fn new(expiration: Duration) -> Self {
        Self { expiration }
    }

    fn apply(&self, commits: &[Arc<IndexCommit>]) {
        let Some((_, older)) = commits.split_last() else {
            return;
        };
        let cutoff = now_millis().saturating_sub(self.expiration.as_millis() as u64);
        for commit in older {
            if commit.modified_millis() < cutoff {
                commit.delete();
            }
        }
    }
}

impl DeletionPolicy for ExpirationTimeDeletionPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.apply(commits);
        Ok(())
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.apply(commits);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SnapshotState {
    last: Option<Arc<IndexCommit>>,
    snapshot: Option<Generation>,
}

/// Wraps another policy and protects one snapshotted commit from deletion.
///
/// Take a snapshot before copying index files for a hot backup and release
/// it afterwards; in between, the wrapped policy may mark the commit deleted
/// but it is kept.
pub struct SnapshotDeletionPolicy {
    inner: Arc<dyn DeletionPolicy>,
    state: Mutex<SnapshotState>,
}

impl SnapshotDeletionPolicy {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn DeletionPolicy>) -> Self {
        Self {
            inner,
            state: Mutex::new(SnapshotState::default()),
        }
    }

    /// Protects the newest commit and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if a snapshot is already held
    /// or no commit has been seen yet.
    pub fn snapshot(&self) -> CoreResult<Arc<IndexCommit>> {
        let mut state = self.state.lock();
        if state.snapshot.is_some() {
            return Err(CoreError::invalid_operation(
                "snapshot already taken; release it first",
            ));
        }
        let last = state
            .last
            .clone()
            .ok_or_else(|| CoreError::invalid_operation("no commit to snapshot"))?;
        state.snapshot = Some(last.generation());
        tracing::info!(
            target: "tessera::policy",
            generation = last.generation().as_u64(),
            "snapshot taken"
        );
        Ok(last)
    }

    /// Releases the snapshot; the commit becomes deletable at the next
    /// checkpoint.
    pub fn release(&self) {
        if let Some(generation) = self.state.lock().snapshot.take() {
            tracing::info!(
                target: "tessera::policy",
                generation = generation.as_u64(),
                "snapshot released"
            );
        }
    }

    /// Returns the protected generation, if any.
    #[must_use]
    pub fn snapshot_generation(&self) -> Option<Generation> {
        self.state.lock().snapshot
    }

    fn protect(&self, commits: &[Arc<IndexCommit>]) {
        let mut state = self.state.lock();
        state.last = commits.last().cloned();
        if let Some(generation) = state.snapshot {
            for commit in commits.iter().filter(|c| c.generation() == generation) {
                commit.undelete();
            }
        }
    }
}

impl fmt::Debug for SnapshotDeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotDeletionPolicy")
            .field("inner", &self.inner)
            .field("snapshot", &self.state.lock().snapshot)
            .finish()
    }
}

impl DeletionPolicy for SnapshotDeletionPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.inner.on_init(commits)?;
        self.protect(commits);
        Ok(())
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        self.inner.on_commit(commits)?;
        self.protect(commits);
        Ok(())
    }
}
