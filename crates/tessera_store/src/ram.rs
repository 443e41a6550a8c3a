//! In-memory directory for testing.

use crate::directory::{Directory, IndexOutput};
use crate::error::{StoreError, StoreResult};
use crate::lock::Lock;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct RamFile {
    data: Arc<Vec<u8>>,
    modified: u64,
}

#[derive(Default)]
struct RamState {
    files: RwLock<BTreeMap<String, RamFile>>,
    locks: Mutex<HashSet<String>>,
}

/// An in-memory directory.
///
/// This directory keeps all files in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral indexes that don't need persistence
///
/// Cloning a `RamDirectory` yields another handle to the same files and
/// locks.
///
/// # Thread Safety
///
/// This directory is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use tessera_store::{Directory, RamDirectory};
/// use std::io::Write;
///
/// let dir = RamDirectory::new();
/// let mut out = dir.create_output("segments_1").unwrap();
/// out.write_all(b"test data").unwrap();
/// out.close().unwrap();
/// assert_eq!(dir.file_length("segments_1").unwrap(), 9);
/// ```
#[derive(Debug, Clone)]
pub struct RamDirectory {
    id: uuid::Uuid,
    state: Arc<RamState>,
}

impl Default for RamDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl RamDirectory {
    /// Creates a new empty in-memory directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            state: Arc::new(RamState::default()),
        }
    }

    /// Overrides the modification time of a file.
    ///
    /// Useful for testing time-based retention without sleeping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FileNotFound`] if the file is missing.
    pub fn set_file_modified(&self, name: &str, millis: u64) -> StoreResult<()> {
        let mut files = self.state.files.write();
        let file = files
            .get_mut(name)
            .ok_or_else(|| StoreError::file_not_found(name))?;
        file.modified = millis;
        Ok(())
    }

    /// Returns the total number of bytes held.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.state
            .files
            .read()
            .values()
            .map(|f| f.data.len() as u64)
            .sum()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Directory for RamDirectory {
    fn list_all(&self) -> StoreResult<Vec<String>> {
        Ok(self.state.files.read().keys().cloned().collect())
    }

    fn file_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.state.files.read().contains_key(name))
    }

    fn read_file(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.state
            .files
            .read()
            .get(name)
            .map(|f| f.data.as_ref().clone())
            .ok_or_else(|| StoreError::file_not_found(name))
    }

    fn create_output(&self, name: &str) -> StoreResult<Box<dyn IndexOutput>> {
        Ok(Box::new(RamOutput {
            name: name.to_string(),
            buffer: Vec::new(),
            state: Arc::clone(&self.state),
        }))
    }

    fn delete_file(&self, name: &str) -> StoreResult<()> {
        self.state
            .files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::file_not_found(name))
    }

    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut files = self.state.files.write();
        let file = files
            .remove(from)
            .ok_or_else(|| StoreError::file_not_found(from))?;
        files.insert(to.to_string(), file);
        Ok(())
    }

    fn sync(&self, names: &[String]) -> StoreResult<()> {
        let files = self.state.files.read();
        for name in names {
            if !files.contains_key(name) {
                return Err(StoreError::file_not_found(name.as_str()));
            }
        }
        Ok(())
    }

    fn file_modified(&self, name: &str) -> StoreResult<u64> {
        self.state
            .files
            .read()
            .get(name)
            .map(|f| f.modified)
            .ok_or_else(|| StoreError::file_not_found(name))
    }

    fn file_length(&self, name: &str) -> StoreResult<u64> {
        self.state
            .files
            .read()
            .get(name)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| StoreError::file_not_found(name))
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(RamLock {
            name: name.to_string(),
            held: false,
            state: Arc::clone(&self.state),
        })
    }

    fn lock_id(&self) -> String {
        format!("ram@{}", self.id)
    }
}

struct RamOutput {
    name: String,
    buffer: Vec<u8>,
    state: Arc<RamState>,
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Bytes become visible on close
        Ok(())
    }
}

impl IndexOutput for RamOutput {
    fn close(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.state.files.write().insert(
            this.name,
            RamFile {
                data: Arc::new(this.buffer),
                modified: now_millis(),
            },
        );
        Ok(())
    }
}

#[derive(Debug)]
struct RamLock {
    name: String,
    held: bool,
    state: Arc<RamState>,
}

impl std::fmt::Debug for RamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamState")
            .field("files", &self.files.read().len())
            .finish()
    }
}

impl Lock for RamLock {
    fn obtain(&mut self) -> StoreResult<bool> {
        if self.held {
            return Ok(true);
        }
        self.held = self.state.locks.lock().insert(self.name.clone());
        Ok(self.held)
    }

    fn release(&mut self) -> StoreResult<()> {
        if self.held {
            self.state.locks.lock().remove(&self.name);
            self.held = false;
        }
        Ok(())
    }

    fn is_locked(&self) -> StoreResult<bool> {
        Ok(self.state.locks.lock().contains(&self.name))
    }
}

impl Drop for RamLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
