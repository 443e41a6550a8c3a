//! File-system directory for persistent indexes.

use crate::directory::{Directory, IndexOutput};
use crate::error::{StoreError, StoreResult};
use crate::lock::Lock;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A directory backed by a folder on the local file system.
///
/// Index files survive process restarts.
///
/// # Durability
///
/// - Closing an output flushes it to the OS
/// - `sync()` calls `File::sync_all()` on every named file
/// - `rename()` fsyncs the folder so the new name is durable
///
/// # Locking
///
/// Locks are advisory OS file locks taken through `fs2` on a lock file in the
/// folder. The lock file stays on disk after release; only the OS lock on it
/// is dropped.
///
/// # Example
///
/// ```no_run
/// use tessera_store::{Directory, FsDirectory};
/// use std::path::Path;
///
/// let dir = FsDirectory::open(Path::new("my_index")).unwrap();
/// println!("{:?}", dir.list_all().unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct FsDirectory {
    path: PathBuf,
}

impl FsDirectory {
    /// Opens a directory, creating the folder if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be created or the path exists
    /// and is not a folder.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the folder path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    fn map_not_found(err: io::Error, name: &str) -> StoreError {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::file_not_found(name)
        } else {
            StoreError::Io(err)
        }
    }

    #[cfg(unix)]
    fn sync_folder(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_folder(&self) -> StoreResult<()> {
        // NTFS journals metadata updates
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn list_all(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.file_path(name).is_file())
    }

    fn read_file(&self, name: &str) -> StoreResult<Vec<u8>> {
        fs::read(self.file_path(name)).map_err(|e| Self::map_not_found(e, name))
    }

    fn create_output(&self, name: &str) -> StoreResult<Box<dyn IndexOutput>> {
        let file = File::create(self.file_path(name))?;
        Ok(Box::new(FsOutput {
            writer: BufWriter::new(file),
        }))
    }

    fn delete_file(&self, name: &str) -> StoreResult<()> {
        fs::remove_file(self.file_path(name)).map_err(|e| Self::map_not_found(e, name))
    }

    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        fs::rename(self.file_path(from), self.file_path(to))
            .map_err(|e| Self::map_not_found(e, from))?;
        self.sync_folder()
    }

    fn sync(&self, names: &[String]) -> StoreResult<()> {
        for name in names {
            let file = File::open(self.file_path(name)).map_err(|e| Self::map_not_found(e, name))?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn file_modified(&self, name: &str) -> StoreResult<u64> {
        let meta = fs::metadata(self.file_path(name)).map_err(|e| Self::map_not_found(e, name))?;
        let modified = meta.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0))
    }

    fn file_length(&self, name: &str) -> StoreResult<u64> {
        let meta = fs::metadata(self.file_path(name)).map_err(|e| Self::map_not_found(e, name))?;
        Ok(meta.len())
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        Box::new(FsLock {
            path: self.file_path(name),
            file: None,
        })
    }

    fn lock_id(&self) -> String {
        let canonical = fs::canonicalize(&self.path).unwrap_or_else(|_| self.path.clone());
        format!("fs@{}", canonical.display())
    }
}

struct FsOutput {
    writer: BufWriter<File>,
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IndexOutput for FsOutput {
    fn close(mut self: Box<Self>) -> StoreResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug)]
struct FsLock {
    path: PathBuf,
    /// Open lock file while the lock is held.
    file: Option<File>,
}

impl Lock for FsLock {
    fn obtain(&mut self) -> StoreResult<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(false);
        }
        self.file = Some(file);
        Ok(true)
    }

    fn release(&mut self) -> StoreResult<()> {
        if let Some(file) = self.file.take() {
            file.unlock()?;
        }
        Ok(())
    }

    fn is_locked(&self) -> StoreResult<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if !self.path.exists() {
            return Ok(false);
        }
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if file.try_lock_exclusive().is_err() {
            return Ok(true);
        }
        file.unlock()?;
        Ok(false)
    }
}

impl Drop for FsLock {
    fn drop(&mut self) {
        // The OS drops the lock when the file is closed
        let _ = self.release();
    }
}
