//! Error types for Tessera core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Directory error.
    #[error("store error: {0}")]
    Store(#[from] tessera_store::StoreError),

    /// Segment codec error.
    #[error("codec error: {0}")]
    Codec(#[from] tessera_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A commit or segment file failed its format or checksum checks.
    #[error("corrupt index: {message}")]
    CorruptIndex {
        /// Description of the corruption.
        message: String,
    },

    /// No readable commit exists in the directory.
    #[error("no index found: {message}")]
    IndexNotFound {
        /// Description of what was looked for.
        message: String,
    },

    /// The directory write lock is held by someone else.
    #[error("lock obtain timed out: {lock}")]
    LockObtainFailed {
        /// Identifier of the contested lock.
        lock: String,
    },

    /// The handle has been closed.
    #[error("{what} is closed")]
    AlreadyClosed {
        /// Kind of handle.
        what: &'static str,
    },

    /// A mutation was attempted on a read-only handle.
    #[error("read-only: {operation} is not allowed")]
    ReadOnly {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A shared buffer was released more often than it was acquired.
    #[error("double release of a shared buffer")]
    DoubleRelease,

    /// A merge failed; the previously published commit is untouched.
    #[error("merge failed: {message}")]
    Merge {
        /// Description of the failure.
        message: String,
    },

    /// A file name does not follow the generation naming scheme.
    #[error("malformed file name: {name}")]
    Format {
        /// The offending name.
        name: String,
    },

    /// A reader tried to write but the index moved on since it opened.
    #[error("stale reader: {message}")]
    StaleReader {
        /// Description of the version mismatch.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt index error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            message: message.into(),
        }
    }

    /// Creates an index not found error.
    pub fn index_not_found(message: impl Into<String>) -> Self {
        Self::IndexNotFound {
            message: message.into(),
        }
    }

    /// Creates a lock obtain failed error.
    pub fn lock_obtain_failed(lock: impl Into<String>) -> Self {
        Self::LockObtainFailed { lock: lock.into() }
    }

    /// Creates a merge error.
    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            message: message.into(),
        }
    }

    /// Creates a file name format error.
    pub fn format(name: impl Into<String>) -> Self {
        Self::Format { name: name.into() }
    }

    /// Creates a stale reader error.
    pub fn stale_reader(message: impl Into<String>) -> Self {
        Self::StaleReader {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error means the index (or a file it needs) is
    /// missing rather than damaged.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::IndexNotFound { .. } => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}
