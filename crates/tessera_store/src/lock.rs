//! Exclusive directory locks.

use crate::error::StoreResult;
use std::time::{Duration, Instant};

/// Name of the lock held by any actor that publishes commits.
pub const WRITE_LOCK_NAME: &str = "write.lock";

/// Interval between attempts while waiting for a lock.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock scoped to a directory.
///
/// At most one `Lock` instance per directory and lock name can be obtained at
/// a time, across threads and (for [`crate::FsDirectory`]) processes.
/// Dropping an obtained lock releases it.
pub trait Lock: Send + std::fmt::Debug {
    /// Attempts to obtain the lock without waiting.
    ///
    /// Returns `Ok(false)` if another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state cannot be inspected.
    fn obtain(&mut self) -> StoreResult<bool>;

    /// Releases the lock if held by this instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the release fails.
    fn release(&mut self) -> StoreResult<()>;

    /// Returns whether any holder currently has the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state cannot be inspected.
    fn is_locked(&self) -> StoreResult<bool>;
}

/// Repeatedly tries to obtain `lock` until it succeeds or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. A zero timeout makes exactly one attempt.
///
/// # Errors
///
/// Propagates errors from [`Lock::obtain`].
pub fn obtain_with_timeout(lock: &mut dyn Lock, timeout: Duration) -> StoreResult<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        if lock.obtain()? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(?lock, ?timeout, "lock wait timed out");
            return Ok(false);
        }
        std::thread::sleep(LOCK_POLL_INTERVAL.min(deadline - now));
    }
}
