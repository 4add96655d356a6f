//! Store statistics counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by every shard of a store.
#[derive(Debug, Default)]
pub struct StoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StoreStats {
    /// Record a successful lookup.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed lookup.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an expiration removal (sweeper or lazy).
    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture current counter values together with per-shard sizes.
    pub fn snapshot(&self, shard_sizes: Vec<usize>) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            shard_sizes,
        }
    }
}

/// Point-in-time view of store statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// Entries evicted under quota pressure
    pub evictions: u64,
    /// Entries removed because they expired
    pub expirations: u64,
    /// Live entry count per shard
    pub shard_sizes: Vec<usize>,
}

impl StatsSnapshot {
    /// Total live entries across shards.
    pub fn size(&self) -> usize {
        self.shard_sizes.iter().sum()
    }

    /// hits / (hits + misses), or 0 when there were no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
