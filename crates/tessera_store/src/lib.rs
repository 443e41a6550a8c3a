//! # Tessera Store
//!
//! Directory abstraction and storage backends for Tessera.
//!
//! This crate provides the lowest-level storage abstraction for Tessera.
//! A [`Directory`] is a flat namespace of **write-once files** plus an
//! exclusive write lock. Directories do not interpret the bytes they store.
//!
//! ## Design Principles
//!
//! - Files are written once through an [`IndexOutput`] and never modified
//! - `rename` is the only way to publish a file under a new name atomically
//! - No knowledge of commit files, segments or norms
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`RamDirectory`] - For testing and ephemeral indexes
//! - [`FsDirectory`] - For persistent indexes using OS file APIs
//! - [`FaultyDirectory`] - Wrapper that injects I/O failures for tests
//!
//! ## Example
//!
//! ```rust
//! use tessera_store::{Directory, RamDirectory};
//! use std::io::Write;
//!
//! let dir = RamDirectory::new();
//! let mut out = dir.create_output("_0.cfs").unwrap();
//! out.write_all(b"hello world").unwrap();
//! out.close().unwrap();
//! assert_eq!(dir.read_file("_0.cfs").unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod faulty;
mod fs;
mod lock;
mod ram;

pub use directory::{Directory, IndexOutput};
pub use error::{StoreError, StoreResult};
pub use faulty::{FaultOp, FaultyDirectory};
pub use fs::FsDirectory;
pub use lock::{obtain_with_timeout, Lock, LOCK_POLL_INTERVAL, WRITE_LOCK_NAME};
pub use ram::RamDirectory;
