//! Directory trait definition.

use crate::error::StoreResult;
use crate::lock::Lock;
use std::io::Write;

/// A flat collection of write-once files used to hold an index.
///
/// Directories are **opaque file stores**. The index core owns every file
/// format; a directory only lists, reads, writes, renames and deletes whole
/// files, and hands out the exclusive write lock.
///
/// # Invariants
///
/// - A file created with `create_output` becomes visible only after its
///   output is closed
/// - `rename` replaces the target atomically: readers observe either the old
///   name or the new one, never a partial file
/// - `sync` makes the named files durable
/// - Directories must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::RamDirectory`] - For testing
/// - [`super::FsDirectory`] - For persistent indexes
/// - [`super::FaultyDirectory`] - For failure injection
pub trait Directory: Send + Sync + std::fmt::Debug {
    /// Lists the names of all files in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be produced.
    fn list_all(&self) -> StoreResult<Vec<String>>;

    /// Returns whether a file with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn file_exists(&self, name: &str) -> StoreResult<bool>;

    /// Reads the whole content of a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::FileNotFound`] if the file is missing.
    fn read_file(&self, name: &str) -> StoreResult<Vec<u8>>;

    /// Creates a new file for writing, replacing any file with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create_output(&self, name: &str) -> StoreResult<Box<dyn IndexOutput>>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::FileNotFound`] if the file is missing.
    fn delete_file(&self, name: &str) -> StoreResult<()>;

    /// Atomically renames `from` to `to`, replacing `to` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is missing or the rename fails.
    fn rename(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Makes the named files durable.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be synced.
    fn sync(&self, names: &[String]) -> StoreResult<()>;

    /// Returns the last modification time of a file, in milliseconds since
    /// the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::FileNotFound`] if the file is missing.
    fn file_modified(&self, name: &str) -> StoreResult<u64>;

    /// Returns the length of a file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::FileNotFound`] if the file is missing.
    fn file_length(&self, name: &str) -> StoreResult<u64>;

    /// Creates a lock object for the given lock name.
    ///
    /// The lock is not obtained until [`Lock::obtain`] is called.
    fn make_lock(&self, name: &str) -> Box<dyn Lock>;

    /// Returns an identifier that is equal for two directory instances
    /// addressing the same underlying storage.
    fn lock_id(&self) -> String;
}

/// A file being written to a [`Directory`].
///
/// Bytes are written through the [`Write`] implementation. The file is
/// complete only after [`IndexOutput::close`] returns successfully.
pub trait IndexOutput: Write + Send {
    /// Flushes and closes the output, publishing the file.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered data cannot be written.
    fn close(self: Box<Self>) -> StoreResult<()>;
}

impl<D: Directory + ?Sized> Directory for std::sync::Arc<D> {
    fn list_all(&self) -> StoreResult<Vec<String>> {
        (**self).list_all()
    }

    fn file_exists(&self, name: &str) -> StoreResult<bool> {
        (**self).file_exists(name)
    }

    fn read_file(&self, name: &str) -> StoreResult<Vec<u8>> {
        (**self).read_file(name)
    }

    fn create_output(&self, name: &str) -> StoreResult<Box<dyn IndexOutput>> {
        (**self).create_output(name)
    }

    fn delete_file(&self, name: &str) -> StoreResult<()> {
        (**self).delete_file(name)
    }

    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        (**self).rename(from, to)
    }

    fn sync(&self, names: &[String]) -> StoreResult<()> {
        (**self).sync(names)
    }

    fn file_modified(&self, name: &str) -> StoreResult<u64> {
        (**self).file_modified(name)
    }

    fn file_length(&self, name: &str) -> StoreResult<u64> {
        (**self).file_length(name)
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        (**self).make_lock(name)
    }

    fn lock_id(&self) -> String {
        (**self).lock_id()
    }
}
