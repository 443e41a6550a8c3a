//! Writer and reader configuration.

use crate::commit::IndexCommit;
use crate::policy::{DeletionPolicy, KeepOnlyLastCommitDeletionPolicy};
use crate::similarity::{DefaultSimilarity, Similarity};
use std::sync::Arc;
use std::time::Duration;

/// How a writer treats an existing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Start a new, empty index. Existing commits are kept for the
    /// deletion policy to judge.
    Create,
    /// Open an existing index; fail if there is none.
    Append,
    /// Append if an index exists, otherwise create one.
    #[default]
    CreateOrAppend,
}

/// Configuration for opening an [`IndexWriter`](crate::IndexWriter).
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Create or append.
    pub open_mode: OpenMode,

    /// Decides which commits survive.
    pub deletion_policy: Arc<dyn DeletionPolicy>,

    /// Start from this commit instead of the latest one.
    pub index_commit: Option<Arc<IndexCommit>>,

    /// Buffered documents that trigger a flush.
    pub max_buffered_docs: usize,

    /// Segment count that triggers a merge of the trailing segments.
    pub merge_factor: usize,

    /// Write new segments as a single compound file.
    pub use_compound_file: bool,

    /// How long to wait for the write lock.
    pub write_lock_timeout: Duration,

    /// Norm computation for new documents.
    pub similarity: Arc<dyn Similarity>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            open_mode: OpenMode::default(),
            deletion_policy: Arc::new(KeepOnlyLastCommitDeletionPolicy),
            index_commit: None,
            max_buffered_docs: 10,
            merge_factor: 10,
            use_compound_file: true,
            write_lock_timeout: Duration::from_secs(1),
            similarity: Arc::new(DefaultSimilarity),
        }
    }
}

impl WriterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open mode.
    #[must_use]
    pub const fn open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    /// Sets the deletion policy.
    #[must_use]
    pub fn deletion_policy(mut self, policy: Arc<dyn DeletionPolicy>) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// Opens on a specific commit.
    #[must_use]
    pub fn index_commit(mut self, commit: Arc<IndexCommit>) -> Self {
        self.index_commit = Some(commit);
        self
    }

    /// Sets the flush threshold; raised to at least one.
    #[must_use]
    pub const fn max_buffered_docs(mut self, docs: usize) -> Self {
        self.max_buffered_docs = if docs == 0 { 1 } else { docs };
        self
    }

    /// Sets the merge factor; raised to at least two.
    #[must_use]
    pub const fn merge_factor(mut self, factor: usize) -> Self {
        self.merge_factor = if factor < 2 { 2 } else { factor };
        self
    }

    /// Sets whether new segments use the compound layout.
    #[must_use]
    pub const fn use_compound_file(mut self, value: bool) -> Self {
        self.use_compound_file = value;
        self
    }

    /// Sets the write lock timeout.
    #[must_use]
    pub const fn write_lock_timeout(mut self, timeout: Duration) -> Self {
        self.write_lock_timeout = timeout;
        self
    }

    /// Sets the similarity.
    #[must_use]
    pub fn similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }
}

/// Configuration for opening an [`IndexReader`](crate::IndexReader).
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Reject deletions and norm updates.
    pub read_only: bool,

    /// Policy applied when the reader commits its own changes.
    pub deletion_policy: Arc<dyn DeletionPolicy>,

    /// Read this commit instead of the latest one.
    pub index_commit: Option<Arc<IndexCommit>>,

    /// How long a mutating reader waits for the write lock.
    pub write_lock_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            deletion_policy: Arc::new(KeepOnlyLastCommitDeletionPolicy),
            index_commit: None,
            write_lock_timeout: Duration::from_secs(1),
        }
    }
}

impl ReaderConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the deletion policy.
    #[must_use]
    pub fn deletion_policy(mut self, policy: Arc<dyn DeletionPolicy>) -> Self {
        self.deletion_policy = policy;
        self
    }

    /// Opens a specific commit.
    #[must_use]
    pub fn index_commit(mut self, commit: Arc<IndexCommit>) -> Self {
        self.index_commit = Some(commit);
        self
    }

    /// Sets the write lock timeout.
    #[must_use]
    pub const fn write_lock_timeout(mut self, timeout: Duration) -> Self {
        self.write_lock_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::KeepAllDeletionPolicy;

    #[test]
    fn default_config() {
        let config = WriterConfig::default();
        assert_eq!(config.open_mode, OpenMode::CreateOrAppend);
        assert_eq!(config.max_buffered_docs, 10);
        assert_eq!(config.merge_factor, 10);
        assert!(config.use_compound_file);
        assert!(config.index_commit.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = WriterConfig::new()
            .open_mode(OpenMode::Create)
            .deletion_policy(Arc::new(KeepAllDeletionPolicy))
            .max_buffered_docs(0)
            .merge_factor(1)
            .use_compound_file(false)
            .write_lock_timeout(Duration::from_millis(10));

        assert_eq!(config.open_mode, OpenMode::Create);
        assert_eq!(config.max_buffered_docs, 1);
        assert_eq!(config.merge_factor, 2);
        assert!(!config.use_compound_file);
        assert_eq!(config.write_lock_timeout, Duration::from_millis(10));

        let reader = ReaderConfig::new().read_only(true);
        assert!(reader.read_only);
    }
}
