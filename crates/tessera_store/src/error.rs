//! Error types for directory operations.

use std::io;
use thiserror::Error;

/// Result type for directory operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The named file does not exist.
    #[error("file not found: {name}")]
    FileNotFound {
        /// The missing file name.
        name: String,
    },

    /// The directory has been closed.
    #[error("directory is closed")]
    Closed,

    /// A failure injected by [`crate::FaultyDirectory`].
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Creates a file-not-found error.
    pub fn file_not_found(name: impl Into<String>) -> Self {
        Self::FileNotFound { name: name.into() }
    }

    /// Returns true if this error means the file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
