//! Keyed entry with access and expiry metadata
//!
//! The access metadata is atomic so the read path can record a touch while
//! holding only the shard read lock; the eviction policies consume it under
//! the shard write lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::Value;

/// Current wall clock as milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One stored entry.
///
/// An entry is visible iff `expires_at_ms` is unset or the current time is
/// strictly less than it.
#[derive(Debug)]
pub struct Entry {
    /// The stored value
    pub value: Value,
    /// Creation time (epoch millis)
    pub created_at_ms: u64,
    /// Absolute expiration deadline, if any (epoch millis)
    pub expires_at_ms: Option<u64>,
    /// Last access time (epoch millis), updated on reads without a write lock
    last_access_ms: AtomicU64,
    /// Number of accesses, updated on reads without a write lock
    access_count: AtomicU64,
}

impl Entry {
    /// Create a fresh entry.
    pub fn new(value: Value, now_ms: u64, expires_at_ms: Option<u64>) -> Self {
        Entry {
            value,
            created_at_ms: now_ms,
            expires_at_ms,
            last_access_ms: AtomicU64::new(now_ms),
            access_count: AtomicU64::new(0),
        }
    }

    /// Rebuild an entry from persisted metadata (snapshot load).
    pub fn restore(
        value: Value,
        created_at_ms: u64,
        expires_at_ms: Option<u64>,
        last_access_ms: u64,
        access_count: u64,
    ) -> Self {
        Entry {
            value,
            created_at_ms,
            expires_at_ms,
            last_access_ms: AtomicU64::new(last_access_ms),
            access_count: AtomicU64::new(access_count),
        }
    }

    /// Whether the entry is past its expiration at `now_ms`.
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }

    /// Milliseconds until expiration, `None` when no TTL is set.
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        self.expires_at_ms.map(|at| at.saturating_sub(now_ms))
    }

    /// Record an access.
    #[inline]
    pub fn touch(&self, now_ms: u64) {
        self.last_access_ms.store(now_ms, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Last access time (epoch millis).
    pub fn last_access_ms(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }

    /// Access count since creation (or since snapshot restore).
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Entry {
            value: self.value.clone(),
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
            last_access_ms: AtomicU64::new(self.last_access_ms()),
            access_count: AtomicU64::new(self.access_count()),
        }
    }
}
