//! One shard of the keyspace
//!
//! A shard owns its entry map and TTL index behind a single RwLock; the
//! recency list sits behind its own mutex so the read path can record
//! recency without taking the shard write lock. Lock order is always
//! shard data before recency.

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use cachegrid_core::Entry;

use crate::recency::RecencyList;
use crate::ttl::TtlIndex;

/// Shard contents guarded by the shard RwLock.
#[derive(Debug, Default)]
pub(crate) struct Shard {
    pub(crate) entries: FxHashMap<Vec<u8>, Entry>,
    pub(crate) ttl: TtlIndex,
}

impl Shard {
    pub(crate) fn new() -> Self {
        Shard {
            entries: FxHashMap::default(),
            ttl: TtlIndex::new(),
        }
    }

    /// Install an entry, replacing any previous one and keeping the TTL
    /// index in sync with both the old and new expirations.
    pub(crate) fn install(&mut self, key: Vec<u8>, entry: Entry) {
        if let Some(old) = self.entries.get(&key) {
            if let Some(at) = old.expires_at_ms {
                self.ttl.remove(at, &key);
            }
        }
        if let Some(at) = entry.expires_at_ms {
            self.ttl.insert(at, &key);
        }
        self.entries.insert(key, entry);
    }

    /// Remove an entry and its TTL index slot.
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if let Some(at) = entry.expires_at_ms {
            self.ttl.remove(at, key);
        }
        Some(entry)
    }

    /// Change an entry's expiration, updating the TTL index. No-op when
    /// the key is absent.
    pub(crate) fn set_expiry(&mut self, key: &[u8], expires_at_ms: Option<u64>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(old) = entry.expires_at_ms {
            self.ttl.remove(old, key);
        }
        if let Some(at) = expires_at_ms {
            self.ttl.insert(at, key);
        }
        entry.expires_at_ms = expires_at_ms;
    }

    /// Live entry count at `now_ms` (expired-but-unswept entries excluded).
    pub(crate) fn live_len(&self, now_ms: u64) -> usize {
        self.entries
            .values()
            .filter(|e| !e.is_expired(now_ms))
            .count()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.ttl.clear();
    }
}

/// A shard and its recency sidecar.
#[derive(Debug)]
pub(crate) struct ShardCell {
    pub(crate) data: RwLock<Shard>,
    pub(crate) recency: Mutex<RecencyList>,
}

impl ShardCell {
    pub(crate) fn new() -> Self {
        ShardCell {
            data: RwLock::new(Shard::new()),
            recency: Mutex::new(RecencyList::new()),
        }
    }
}
