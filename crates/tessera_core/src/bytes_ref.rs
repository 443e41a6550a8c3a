//! Reference-counted byte buffers with copy-on-write.
//!
//! Norm bytes and deleted-document bitsets are shared between a reader and
//! its clones. Each holder owns one [`BytesRef`] handle; the buffer's count
//! equals the number of live handles. A holder that wants to mutate calls
//! [`BytesRef::ensure_writable`], which copies the bytes out if anyone else
//! still shares them.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Shared {
    refs: usize,
    bytes: Vec<u8>,
}

/// One counted handle onto a shared byte buffer.
///
/// Handles are not `Clone`: a new holder must call [`BytesRef::acquire`].
/// Dropping a handle that was not released releases it.
pub struct BytesRef {
    shared: Arc<Mutex<Shared>>,
    released: AtomicBool,
}

impl BytesRef {
    /// Wraps `bytes` in a new buffer with a count of one.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared { refs: 1, bytes })),
            released: AtomicBool::new(false),
        }
    }

    /// Returns a new handle onto the same buffer, incrementing its count.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyClosed`] if this handle was released.
    pub fn acquire(&self) -> CoreResult<Self> {
        if self.is_released() {
            return Err(CoreError::AlreadyClosed { what: "norm buffer" });
        }
        self.shared.lock().refs += 1;
        Ok(Self {
            shared: Arc::clone(&self.shared),
            released: AtomicBool::new(false),
        })
    }

    /// Gives up this handle, decrementing the buffer's count.
    ///
    /// The bytes are freed once the count reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DoubleRelease`] if the handle was already
    /// released.
    pub fn release(&self) -> CoreResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            tracing::error!(target: "tessera::bytes", "shared buffer released twice");
            return Err(CoreError::DoubleRelease);
        }
        let mut shared = self.shared.lock();
        if shared.refs == 0 {
            tracing::error!(target: "tessera::bytes", "shared buffer count underflow");
            return Err(CoreError::DoubleRelease);
        }
        shared.refs -= 1;
        if shared.refs == 0 {
            shared.bytes = Vec::new();
        }
        Ok(())
    }

    /// Returns a handle that is the buffer's sole owner.
    ///
    /// If this handle is the only one, it is returned unchanged. Otherwise
    /// the bytes are copied into a fresh buffer with a count of one and this
    /// handle's share of the old buffer is given up. The check and the copy
    /// happen under the buffer lock, so concurrent acquires and releases on
    /// the old buffer are never lost.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyClosed`] if this handle was released.
    pub fn ensure_writable(self) -> CoreResult<Self> {
        if self.is_released() {
            return Err(CoreError::AlreadyClosed { what: "norm buffer" });
        }
        let copy = {
            let mut shared = self.shared.lock();
            if shared.refs == 1 {
                None
            } else {
                shared.refs -= 1;
                Some(shared.bytes.clone())
            }
        };
        match copy {
            None => Ok(self),
            Some(bytes) => {
                self.released.store(true, Ordering::Release);
                Ok(Self::new(bytes))
            }
        }
    }

    /// Returns the number of live handles on this buffer.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.shared.lock().refs
    }

    /// Returns true if this handle was released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns true if both handles point at the same buffer.
    #[must_use]
    pub fn shares_buffer_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns the buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().bytes.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the byte at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<u8> {
        self.shared.lock().bytes.get(index).copied()
    }

    /// Copies the bytes out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.shared.lock().bytes.clone()
    }

    /// Runs `f` over the bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.shared.lock().bytes)
    }

    /// Runs `f` over the bytes mutably.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] unless this handle is the
    /// sole owner; call [`BytesRef::ensure_writable`] first.
    pub fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> CoreResult<R> {
        if self.is_released() {
            return Err(CoreError::AlreadyClosed { what: "norm buffer" });
        }
        let mut shared = self.shared.lock();
        if shared.refs != 1 {
            return Err(CoreError::invalid_operation(format!(
                "buffer is shared by {} handles",
                shared.refs
            )));
        }
        Ok(f(&mut shared.bytes))
    }
}

impl Drop for BytesRef {
    fn drop(&mut self) {
        if !self.is_released() {
            let _ = self.release();
        }
    }
}

impl fmt::Debug for BytesRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("BytesRef")
            .field("refs", &shared.refs)
            .field("len", &shared.bytes.len())
            .field("released", &self.is_released())
            .finish()
    }
}
