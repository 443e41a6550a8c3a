//! Deletion policies that record and check how the engine calls them.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tessera_core::{
    CoreError, CoreResult, DeletionPolicy, Generation, IndexCommit, IndexReader, ReaderConfig,
};
use tessera_store::Directory;

/// Checks that commits are in publication order.
///
/// Generations and versions strictly increase, timestamps never go back,
/// and every generation matches its commit file name.
///
/// # Errors
///
/// Returns [`CoreError::InvalidOperation`] describing the first violation.
pub fn verify_commit_order(commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
    for commit in commits {
        let named = tessera_core::file_names::generation_from_segments_file_name(
            commit.segments_file_name(),
        )?;
        if named != commit.generation() {
            return Err(CoreError::invalid_operation(format!(
                "{} reports generation {}",
                commit.segments_file_name(),
                commit.generation()
            )));
        }
    }
    for pair in commits.windows(2) {
        let (last, now) = (&pair[0], &pair[1]);
        if now.generation() <= last.generation() {
            return Err(CoreError::invalid_operation(format!(
                "commits out of order: {} after {}",
                now.generation(),
                last.generation()
            )));
        }
        if now.version() <= last.version() {
            return Err(CoreError::invalid_operation(format!(
                "versions out of order: {} after {}",
                now.version(),
                last.version()
            )));
        }
        if now.timestamp() < last.timestamp() {
            return Err(CoreError::invalid_operation(format!(
                "timestamps out of order: now={} vs last={}",
                now.timestamp(),
                last.timestamp()
            )));
        }
    }
    Ok(())
}

/// Wraps a policy, counting its calls and checking its input.
///
/// Every call verifies commit order. `on_commit` also rejects a commit it
/// has already been told about and, with a directory attached, checks that
/// a fresh reader agrees with the newest commit on being optimized.
pub struct CountingPolicy {
    inner: Arc<dyn DeletionPolicy>,
    dir: Option<Arc<dyn Directory>>,
    on_init: AtomicUsize,
    on_commit: AtomicUsize,
    deleted: AtomicUsize,
    seen: Mutex<HashSet<Generation>>,
}

impl CountingPolicy {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn DeletionPolicy>) -> Self {
        Self {
            inner,
            dir: None,
            on_init: AtomicUsize::new(0),
            on_commit: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Also checks each new commit against a reader opened on `dir`.
    #[must_use]
    pub fn with_directory(mut self, dir: Arc<dyn Directory>) -> Self {
        self.dir = Some(dir);
        self
    }

    /// Number of `on_init` calls.
    pub fn on_init_count(&self) -> usize {
        self.on_init.load(Ordering::SeqCst)
    }

    /// Number of `on_commit` calls.
    pub fn on_commit_count(&self) -> usize {
        self.on_commit.load(Ordering::SeqCst)
    }

    /// Number of commits the wrapped policy marked deleted.
    pub fn deleted_count(&self) -> usize {
        self.deleted.load(Ordering::SeqCst)
    }

    fn run(
        &self,
        commits: &[Arc<IndexCommit>],
        call: impl FnOnce(&dyn DeletionPolicy) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let before = commits.iter().filter(|c| c.is_deleted()).count();
        call(self.inner.as_ref())?;
        let after = commits.iter().filter(|c| c.is_deleted()).count();
        self.deleted.fetch_add(after.saturating_sub(before), Ordering::SeqCst);
        Ok(())
    }

    fn check_against_reader(&self, newest: &IndexCommit) -> CoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let mut reader = IndexReader::open(Arc::clone(dir), ReaderConfig::new().read_only(true))?;
        let optimized = reader.is_optimized();
        reader.close()?;
        if optimized != newest.is_optimized() {
            return Err(CoreError::invalid_operation(format!(
                "commit {} optimized={} but reader sees optimized={optimized}",
                newest.segments_file_name(),
                newest.is_optimized()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CountingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingPolicy")
            .field("inner", &self.inner)
            .field("on_init", &self.on_init_count())
            .field("on_commit", &self.on_commit_count())
            .field("deleted", &self.deleted_count())
            .finish()
    }
}

impl DeletionPolicy for CountingPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        verify_commit_order(commits)?;
        self.on_init.fetch_add(1, Ordering::SeqCst);
        self.run(commits, |inner| inner.on_init(commits))
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        verify_commit_order(commits)?;
        let Some(newest) = commits.last() else {
            return Err(CoreError::invalid_operation("on_commit without commits"));
        };
        if !self.seen.lock().insert(newest.generation()) {
            return Err(CoreError::invalid_operation(format!(
                "on_commit called twice for {}",
                newest.segments_file_name()
            )));
        }
        self.check_against_reader(newest)?;
        self.on_commit.fetch_add(1, Ordering::SeqCst);
        self.run(commits, |inner| inner.on_commit(commits))
    }
}

/// Deletes every commit on init and all but the newest on commit.
///
/// Suits bulk loads where no reader needs older commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepNoneOnInitDeletionPolicy;

impl DeletionPolicy for KeepNoneOnInitDeletionPolicy {
    fn on_init(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        commits.iter().for_each(|c| c.delete());
        Ok(())
    }

    fn on_commit(&self, commits: &[Arc<IndexCommit>]) -> CoreResult<()> {
        if let Some((_, older)) = commits.split_last() {
            older.iter().for_each(|c| c.delete());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_content_docs, policy_config, TestIndex};
    use tessera_core::{list_commits, KeepAllDeletionPolicy};

    #[test]
    fn test_counts_writer_calls() {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepAllDeletionPolicy)));
        let mut writer = index.writer(policy_config(policy.clone(), true));
        add_content_docs(&mut writer, 3);
        writer.close().unwrap();

        assert_eq!(policy.on_init_count(), 1);
        assert_eq!(policy.on_commit_count(), 1);
        assert_eq!(policy.deleted_count(), 0);
    }

    #[test]
    fn test_counts_deletions() {
        let index = TestIndex::memory();
        let policy = Arc::new(CountingPolicy::new(Arc::new(KeepNoneOnInitDeletionPolicy)));
        let mut writer = index.writer(policy_config(policy.clone(), true));
        add_content_docs(&mut writer, 3);
        writer.close().unwrap();

        // segments_1 on init, then nothing older than the new commit.
        assert_eq!(policy.deleted_count(), 1);
        assert_eq!(list_commits(index.dir.as_ref()).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_order_accepts_published_commits() {
        let index = TestIndex::memory();
        let mut writer = index.writer(policy_config(Arc::new(KeepAllDeletionPolicy), true));
        for _ in 0..3 {
            add_content_docs(&mut writer, 1);
            writer.commit().unwrap();
        }
        writer.close().unwrap();
        let commits = list_commits(index.dir.as_ref()).unwrap();
        assert_eq!(commits.len(), 4);
        verify_commit_order(&commits).unwrap();
    }

    #[test]
    fn test_commit_order_rejects_reversed_list() {
        let index = TestIndex::memory();
        let mut writer = index.writer(policy_config(Arc::new(KeepAllDeletionPolicy), true));
        add_content_docs(&mut writer, 1);
        writer.close().unwrap();
        let mut commits = list_commits(index.dir.as_ref()).unwrap();
        commits.reverse();
        assert!(verify_commit_order(&commits).is_err());
    }
}
