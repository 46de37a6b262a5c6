//! Named process-wide locks around narrow external calls
//!
//! Each lock is a single-permit semaphore. Workers hold a guard only around
//! the call it protects (a loudness-tool run, a blob upload), never around a
//! whole job, so decoding and analysis of other jobs keep overlapping.

use crate::error::{BatchError, BatchResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Single-permit lock with a name for logging
#[derive(Debug, Clone)]
pub struct NamedLock {
    name: &'static str,
    semaphore: Arc<Semaphore>,
}

impl NamedLock {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the lock, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> BatchResult<LockGuard> {
        let waiting_since = Instant::now();

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(BatchError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| BatchError::Cancelled)?
            }
        };

        let waited_ms = waiting_since.elapsed().as_millis() as u64;
        tracing::debug!(lock = self.name, waited_ms, "Lock acquired");

        Ok(LockGuard {
            name: self.name,
            acquired_at: Instant::now(),
            _permit: permit,
        })
    }

    /// Whether someone currently holds the lock
    pub fn is_held(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Scoped lock ownership; released on drop
#[derive(Debug)]
pub struct LockGuard {
    name: &'static str,
    acquired_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::debug!(
            lock = self.name,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Lock released"
        );
    }
}

/// The locks one run shares across its workers
#[derive(Debug, Clone)]
pub struct ResourceLocks {
    /// Serializes the loudness-normalization tool
    pub mastering: NamedLock,
    /// Serializes blob-store writes
    pub upload: NamedLock,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self {
            mastering: NamedLock::new("mastering"),
            upload: NamedLock::new("upload"),
        }
    }
}

impl Default for ResourceLocks {
    fn default() -> Self {
        Self::new()
    }
}
