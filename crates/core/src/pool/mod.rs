//! Resource pool guard bounding concurrent automation sessions.
//!
//! The shared browser farm has a fixed session capacity. Every clip attempt
//! holds a [`PoolPermit`] for the duration of its automation call; the
//! permit returns its slot when released or dropped, so an attempt that is
//! cancelled mid-call cannot leak capacity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::metrics;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Resource pool is closed")]
    Closed,
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum concurrent holders.
    pub capacity: usize,
    /// Slots currently held.
    pub in_use: usize,
    /// Callers waiting for a slot.
    pub waiting: usize,
    /// Highest `in_use` seen since startup.
    pub peak_in_use: usize,
    /// Total slots handed out since startup.
    pub total_acquired: u64,
}

#[derive(Default)]
struct PoolStats {
    in_use: AtomicU64,
    waiting: AtomicU64,
    peak_in_use: AtomicU64,
    total_acquired: AtomicU64,
}

/// Counting semaphore over the automation farm.
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct ResourcePoolGuard {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<PoolStats>,
}

impl ResourcePoolGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Wait for a free slot. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> Result<PoolPermit, PoolError> {
        let waiting = WaitingGuard::enter(&self.stats);
        let acquired = Arc::clone(&self.semaphore).acquire_owned().await;
        drop(waiting);

        let permit = acquired.map_err(|_| PoolError::Closed)?;

        let in_use = self.stats.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.peak_in_use.fetch_max(in_use, Ordering::Relaxed);
        self.stats.total_acquired.fetch_add(1, Ordering::Relaxed);
        metrics::AUTOMATION_SLOTS_IN_USE.inc();
        debug!("Automation slot acquired ({}/{})", in_use, self.capacity);

        Ok(PoolPermit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Close the pool. Pending and future `acquire` calls fail with
    /// `PoolError::Closed`; held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.capacity,
            in_use: self.stats.in_use.load(Ordering::Relaxed) as usize,
            waiting: self.stats.waiting.load(Ordering::Relaxed) as usize,
            peak_in_use: self.stats.peak_in_use.load(Ordering::Relaxed) as usize,
            total_acquired: self.stats.total_acquired.load(Ordering::Relaxed),
        }
    }
}

// Keeps `waiting` accurate when an acquire future is dropped mid-wait.
struct WaitingGuard<'a>(&'a PoolStats);

impl<'a> WaitingGuard<'a> {
    fn enter(stats: &'a PoolStats) -> Self {
        stats.waiting.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A held automation slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<PoolStats>,
}

impl PoolPermit {
    /// Return the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.stats.in_use.fetch_sub(1, Ordering::Relaxed);
        metrics::AUTOMATION_SLOTS_IN_USE.dec();
    }
}
