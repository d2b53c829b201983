//! Per-resource lock manager
//!
//! Locks are keyed by resource path: shared for safe methods, exclusive for
//! mutations. The table is a concurrent map of per-key entries so unrelated
//! resources never serialize on a global lock. The write path tries first
//! and retries a bounded number of times with a fixed backoff before
//! surfacing contention as a conflict, which bounds worst-case latency
//! instead of blocking indefinitely.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Lock errors
#[derive(Error, Debug)]
pub enum LockError {
    /// The bounded retry budget ran out while another holder kept the lock
    #[error("Lock contention on {path} after {attempts} attempts")]
    Contended {
        /// Contended resource path
        path: String,
        /// Acquisition attempts made
        attempts: u32,
    },
}

pub type LockResult<T> = Result<T, LockError>;

/// Lock acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Concurrent readers
    Shared,
    /// Single writer, excludes everyone
    Exclusive,
}

/// Snapshot of lock counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    /// Locks acquired
    pub acquired: u64,
    /// Locks released
    pub released: u64,
}

#[derive(Default)]
struct LockTables {
    entries: DashMap<String, Arc<RwLock<()>>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl LockTables {
    /// Drop a path's entry once nothing but the table itself holds it
    fn evict(&self, path: &str) {
        self.entries
            .remove_if(path, |_, entry| Arc::strong_count(entry) == 1);
    }
}

enum Guard {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// A held resource lock; releases on drop
pub struct ResourceLock {
    guard: Option<Guard>,
    path: String,
    tables: Arc<LockTables>,
}

impl std::fmt::Debug for ResourceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ResourceLock {
    /// The locked resource path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        // Release before the eviction check so the entry's only remaining
        // holder is the table
        self.guard.take();
        self.tables.released.fetch_add(1, Ordering::Relaxed);
        self.tables.evict(&self.path);
    }
}

/// Lock manager with per-path entries
pub struct LockManager {
    tables: Arc<LockTables>,
    retry_limit: u32,
    backoff: Duration,
}

impl LockManager {
    /// Create a manager with the given write-path retry bound and backoff
    pub fn new(retry_limit: u32, backoff: Duration) -> Self {
        Self {
            tables: Arc::new(LockTables::default()),
            retry_limit,
            backoff,
        }
    }

    fn entry(&self, path: &str) -> Arc<RwLock<()>> {
        // Scope the map reference so the shard is not held across an await
        let entry = self.tables.entries.entry(path.to_string()).or_default();
        entry.value().clone()
    }

    fn held(&self, path: &str, guard: Guard) -> ResourceLock {
        self.tables.acquired.fetch_add(1, Ordering::Relaxed);
        ResourceLock {
            guard: Some(guard),
            path: path.to_string(),
            tables: Arc::clone(&self.tables),
        }
    }

    /// Acquire a lock, waiting as long as it takes
    pub async fn lock(&self, path: &str, mode: LockMode) -> ResourceLock {
        let cell = self.entry(path);
        let guard = match mode {
            LockMode::Shared => Guard::Shared(cell.read_owned().await),
            LockMode::Exclusive => Guard::Exclusive(cell.write_owned().await),
        };
        self.held(path, guard)
    }

    /// Acquire a lock only if it is free right now
    pub fn try_lock(&self, path: &str, mode: LockMode) -> Option<ResourceLock> {
        let cell = self.entry(path);
        let guard = match mode {
            LockMode::Shared => cell.try_read_owned().ok().map(Guard::Shared),
            LockMode::Exclusive => cell.try_write_owned().ok().map(Guard::Exclusive),
        };
        match guard {
            Some(guard) => Some(self.held(path, guard)),
            None => {
                self.tables.evict(path);
                None
            }
        }
    }

    /// Write-path acquisition: try, then bounded retries with backoff, then
    /// contention error
    pub async fn lock_with_retry(&self, path: &str, mode: LockMode) -> LockResult<ResourceLock> {
        if let Some(lock) = self.try_lock(path, mode) {
            return Ok(lock);
        }
        for attempt in 1..=self.retry_limit {
            tokio::time::sleep(self.backoff).await;
            if let Some(lock) = self.try_lock(path, mode) {
                debug!(path, attempt, "lock acquired after retry");
                return Ok(lock);
            }
        }
        Err(LockError::Contended {
            path: path.to_string(),
            attempts: self.retry_limit + 1,
        })
    }

    /// Snapshot of the acquisition counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.tables.acquired.load(Ordering::Relaxed),
            released: self.tables.released.load(Ordering::Relaxed),
        }
    }

    /// Number of live lock entries (held or awaiting eviction)
    pub fn entry_count(&self) -> usize {
        self.tables.entries.len()
    }
}
