//! Failure-injecting directory wrapper.

use crate::directory::{Directory, IndexOutput};
use crate::error::{StoreError, StoreResult};
use crate::lock::Lock;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    /// Creating an output.
    CreateOutput,
    /// Writing bytes into an output (the failure surfaces on close).
    Write,
    /// Deleting a file.
    Delete,
    /// Renaming a file; matched against the source name.
    Rename,
}

#[derive(Debug, Clone)]
struct FaultRule {
    op: FaultOp,
    /// Substring matched against the file name.
    pattern: String,
    /// Remaining failures, `None` for unlimited.
    remaining: Option<u32>,
}

/// A directory that fails selected operations on purpose.
///
/// Wraps any other directory and forwards every call to it, except calls
/// matching an armed rule, which return [`StoreError::Injected`]. Used to
/// exercise crash and retry paths of the index core.
///
/// ```rust
/// use std::sync::Arc;
/// use tessera_store::{Directory, FaultOp, FaultyDirectory, RamDirectory};
///
/// let dir = FaultyDirectory::new(Arc::new(RamDirectory::new()));
/// dir.fail(FaultOp::CreateOutput, "_0");
/// assert!(dir.create_output("_0.cfs").is_err());
/// dir.clear();
/// assert!(dir.create_output("_0.cfs").is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct FaultyDirectory {
    inner: Arc<dyn Directory>,
    rules: Arc<Mutex<Vec<FaultRule>>>,
    injected: Arc<AtomicU64>,
}

impl FaultyDirectory {
    /// Wraps `inner` with no rules armed.
    pub fn new(inner: Arc<dyn Directory>) -> Self {
        Self {
            inner,
            rules: Arc::new(Mutex::new(Vec::new())),
            injected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fails every `op` on a file whose name contains `pattern`.
    pub fn fail(&self, op: FaultOp, pattern: &str) {
        self.push(op, pattern, None);
    }

    /// Fails the next `times` matching calls, then passes them through.
    pub fn fail_times(&self, op: FaultOp, pattern: &str, times: u32) {
        self.push(op, pattern, Some(times));
    }

    /// Disarms every rule.
    pub fn clear(&self) {
        self.rules.lock().clear();
    }

    /// Returns how many failures have been injected so far.
    #[must_use]
    pub fn injected_count(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    /// Returns the wrapped directory.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Directory> {
        &self.inner
    }

    fn push(&self, op: FaultOp, pattern: &str, remaining: Option<u32>) {
        self.rules.lock().push(FaultRule {
            op,
            pattern: pattern.to_string(),
            remaining,
        });
    }

    fn check(&self, op: FaultOp, name: &str) -> StoreResult<()> {
        let mut rules = self.rules.lock();
        let hit = rules
            .iter_mut()
            .find(|r| r.op == op && name.contains(&r.pattern) && r.remaining != Some(0));
        let Some(rule) = hit else {
            return Ok(());
        };
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        rules.retain(|r| r.remaining != Some(0));
        self.injected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target: "tessera::store", ?op, name, "injecting failure");
        Err(StoreError::Injected(format!("{op:?} {name}")))
    }
}

impl Directory for FaultyDirectory {
    fn list_all(&self) -> StoreResult<Vec<String>> {
        self.inner.list_all()
    }

    fn file_exists(&self, name: &str) -> StoreResult<bool> {
        self.inner.file_exists(name)
    }

    fn read_file(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.inner.read_file(name)
    }

    fn create_output(&self, name: &str) -> StoreResult<Box<dyn IndexOutput>> {
        self.check(FaultOp::CreateOutput, name)?;
        let fail_write = self.check(FaultOp::Write, name).err();
        let inner = self.inner.create_output(name)?;
        Ok(Box::new(FaultyOutput { inner, fail_write }))
    }

    fn delete_file(&self, name: &str) -> StoreResult<()> {
        self.check(FaultOp::Delete, name)?;
        self.inner.delete_file(name)
    }

    fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        self.check(FaultOp::Rename, from)?;
        self.inner.rename(from, to)
    }

    fn sync(&self, names: &[String]) -> StoreResult<()> {
        self.inner.sync(names)
    }

    fn file_modified(&self, name: &str) -> StoreResult<u64> {
        self.inner.file_modified(name)
    }

    fn file_length(&self, name: &str) -> StoreResult<u64> {
        self.inner.file_length(name)
    }

    fn make_lock(&self, name: &str) -> Box<dyn Lock> {
        self.inner.make_lock(name)
    }

    fn lock_id(&self) -> String {
        self.inner.lock_id()
    }
}

struct FaultyOutput {
    inner: Box<dyn IndexOutput>,
    /// Set when writes to this output must fail.
    fail_write: Option<StoreError>,
}

impl Write for FaultyOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(err) = &self.fail_write {
            return Err(io::Error::new(io::ErrorKind::Other, err.to_string()));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl IndexOutput for FaultyOutput {
    fn close(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        if let Some(err) = this.fail_write {
            // Abandon the partial file
            drop(this.inner);
            return Err(err);
        }
        this.inner.close()
    }
}
