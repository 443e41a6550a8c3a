//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - Test fixtures and index helpers
//! - Deletion policies that count and check the engine's calls
//! - Property-based test generators using proptest
//! - Fault injection scenarios for the commit protocol
//! - Stress testing utilities
//!
//! The end-to-end scenarios live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_index() {
//!     let index = TestIndex::memory();
//!     let mut writer = index.writer(WriterConfig::new());
//!     add_content_docs(&mut writer, 10);
//!     writer.close().unwrap();
//!     assert_eq!(content_hits(&index.read_only()), 10);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod policies;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::policies::*;
    pub use tessera_core::{
        IndexReader, IndexWriter, KeepAllDeletionPolicy, KeepLastNDeletionPolicy,
        KeepOnlyLastCommitDeletionPolicy, OpenMode, ReaderConfig, WriterConfig,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use policies::*;
