//! # Tessera Core
//!
//! Segment commit and lifecycle engine for Tessera indexes.
//!
//! This crate provides:
//! - Generation-numbered commits published with write, sync and rename
//! - An [`IndexWriter`] that buffers, flushes, merges and commits segments
//! - An [`IndexReader`] that reads one commit and can delete documents or
//!   change norms, committing under the write lock
//! - Pluggable [`DeletionPolicy`] implementations deciding which commits
//!   survive, with file-level reference counting so shared files are only
//!   removed when no surviving commit needs them
//! - Copy-on-write sharing of norms and deletions between cloned readers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera_codec::{Document, Field, Index, Store, Term};
//! use tessera_core::{IndexReader, IndexWriter, WriterConfig};
//! use tessera_store::{Directory, RamDirectory};
//!
//! let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
//! let mut writer = IndexWriter::open(Arc::clone(&dir), WriterConfig::new()).unwrap();
//! let mut doc = Document::new();
//! doc.add(Field::new("content", "aaa", Store::No, Index::Analyzed));
//! writer.add_document(doc).unwrap();
//! writer.close().unwrap();
//!
//! let reader = IndexReader::open_latest(dir).unwrap();
//! assert_eq!(reader.term_docs(&Term::new("content", "aaa")), vec![0]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bytes_ref;
mod commit;
mod config;
mod deleter;
mod error;
pub mod file_names;
pub mod holds;
mod policy;
mod reader;
mod segment_info;
mod segment_reader;
mod segment_writer;
mod similarity;
mod types;
mod writer;

pub use bytes_ref::BytesRef;
pub use commit::{
    latest_generation, list_commits, read_current_version, IndexCommit, SegmentInfos,
    SEGMENTS_FORMAT, SEGMENTS_GEN_FORMAT, SEGMENTS_MAGIC,
};
pub use config::{OpenMode, ReaderConfig, WriterConfig};
pub use error::{CoreError, CoreResult};
pub use policy::{
    DeletionPolicy, ExpirationTimeDeletionPolicy, KeepAllDeletionPolicy,
    KeepLastNDeletionPolicy, KeepOnlyLastCommitDeletionPolicy, SnapshotDeletionPolicy,
};
pub use reader::IndexReader;
pub use segment_info::SegmentInfo;
pub use segment_reader::SegmentReader;
pub use similarity::{DefaultSimilarity, Similarity};
pub use types::{DocId, Generation};
pub use writer::IndexWriter;
