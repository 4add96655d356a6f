//! The partitioned store and its operation surface
//!
//! Every mutation follows the same shape: take the shard write lock,
//! append the op to the WAL sink, then apply it to memory. A failed append
//! leaves memory untouched and surfaces as a durability error. Reads take
//! the shard read lock and record accesses through per-entry atomics plus
//! the recency sidecar, so they never contend with writers on the map.
//!
//! Lock order is always shard data before recency.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use cachegrid_core::entry::epoch_ms;
use cachegrid_core::{
    shard_index, Entry, Error, NoopWalSink, Result, SortedSet, Value, WalOp, WalSink,
};

use crate::config::StoreConfig;
use crate::shard::{Shard, ShardCell};
use crate::stats::{StatsSnapshot, StoreStats};

/// TTL query result for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlState {
    /// Key does not exist (or is expired)
    Missing,
    /// Key exists with no expiration
    NoExpiry,
    /// Key expires after this much time
    Remaining(Duration),
}

/// Partitioned in-memory keyspace.
pub struct PartitionedStore {
    shards: Vec<ShardCell>,
    config: StoreConfig,
    quota: usize,
    stats: StoreStats,
    wal: Arc<dyn WalSink>,
}

impl PartitionedStore {
    /// Create a store with no durability (tests, persistence disabled).
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_wal(config, Arc::new(NoopWalSink))
    }

    /// Create a store logging every mutation through `wal`.
    pub fn with_wal(config: StoreConfig, wal: Arc<dyn WalSink>) -> Result<Self> {
        config.validate()?;
        let shards = (0..config.shards).map(|_| ShardCell::new()).collect();
        let quota = config.shard_quota();
        Ok(PartitionedStore {
            shards,
            config,
            quota,
            stats: StoreStats::default(),
            wal,
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[inline]
    fn cell(&self, key: &[u8]) -> &ShardCell {
        &self.shards[shard_index(key, self.shards.len())]
    }

    // ========================================================================
    // String operations
    // ========================================================================

    /// Look up a string value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let now = epoch_ms();
        let cell = self.cell(key);
        {
            let shard = cell.data.read();
            match shard.entries.get(key) {
                None => {
                    self.stats.record_miss();
                    return Ok(None);
                }
                Some(entry) if entry.is_expired(now) => {}
                Some(entry) => match &entry.value {
                    Value::Str(bytes) => {
                        entry.touch(now);
                        let out = bytes.clone();
                        drop(shard);
                        cell.recency.lock().touch(key);
                        self.stats.record_hit();
                        return Ok(Some(out));
                    }
                    other => return Err(Error::wrong_type("string", other.type_name())),
                },
            }
        }
        self.lazy_expire(cell, key, now);
        self.stats.record_miss();
        Ok(None)
    }

    /// Install a string value, replacing whatever was stored before.
    pub fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if value.len() > self.config.max_value_bytes {
            return Err(Error::capacity(
                "value bytes",
                self.config.max_value_bytes as u64,
                value.len() as u64,
            ));
        }
        let now = epoch_ms();
        let expires_at_ms = ttl.map(|d| now + d.as_millis() as u64);

        let cell = self.cell(key);
        let mut guard = cell.data.write();
        let shard = &mut *guard;

        if !shard.entries.contains_key(key) && shard.entries.len() >= self.quota {
            self.evict_one(cell, shard, now)?;
        }

        let op = WalOp::Set {
            key: key.to_vec(),
            value,
            expires_at_ms,
        };
        self.wal.append(&op)?;
        let WalOp::Set {
            key,
            value,
            expires_at_ms,
        } = op
        else {
            return Ok(());
        };
        shard.install(key.clone(), Entry::new(Value::Str(value), now, expires_at_ms));
        cell.recency.lock().touch(&key);
        Ok(())
    }

    /// Remove a key of any type. Returns true if a live entry was removed.
    pub fn del(&self, key: &[u8]) -> Result<bool> {
        let now = epoch_ms();
        let cell = self.cell(key);
        let mut guard = cell.data.write();
        let shard = &mut *guard;

        match shard.entries.get(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired(now) => {
                self.expire_remove_locked(cell, shard, key)?;
                Ok(false)
            }
            Some(_) => {
                self.wal.append(&WalOp::Del { key: key.to_vec() })?;
                shard.remove(key);
                cell.recency.lock().remove(key);
                Ok(true)
            }
        }
    }

    /// Whether a live entry exists under `key`.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        let now = epoch_ms();
        let cell = self.cell(key);
        {
            let shard = cell.data.read();
            match shard.entries.get(key) {
                None => {
                    self.stats.record_miss();
                    return Ok(false);
                }
                Some(entry) if entry.is_expired(now) => {}
                Some(entry) => {
                    entry.touch(now);
                    drop(shard);
                    cell.recency.lock().touch(key);
                    self.stats.record_hit();
                    return Ok(true);
                }
            }
        }
        self.lazy_expire(cell, key, now);
        self.stats.record_miss();
        Ok(false)
    }

    /// Set an expiration on an existing key. Returns false when the key is
    /// missing (or already expired).
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        let now = epoch_ms();
        let expires_at_ms = now + ttl.as_millis() as u64;

        let cell = self.cell(key);
        let mut guard = cell.data.write();
        let shard = &mut *guard;

        match shard.entries.get(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired(now) => {
                self.expire_remove_locked(cell, shard, key)?;
                Ok(false)
            }
            Some(_) => {
                self.wal.append(&WalOp::Expire {
                    key: key.to_vec(),
                    expires_at_ms,
                })?;
                shard.set_expiry(key, Some(expires_at_ms));
                cell.recency.lock().touch(key);
                Ok(true)
            }
        }
    }

    /// Remaining TTL for a key.
    pub fn ttl(&self, key: &[u8]) -> Result<TtlState> {
        let now = epoch_ms();
        let cell = self.cell(key);
        {
            let shard = cell.data.read();
            match shard.entries.get(key) {
                None => return Ok(TtlState::Missing),
                Some(entry) if entry.is_expired(now) => {}
                Some(entry) => {
                    entry.touch(now);
                    let state = match entry.remaining_ms(now) {
                        None => TtlState::NoExpiry,
                        Some(ms) => TtlState::Remaining(Duration::from_millis(ms)),
                    };
                    drop(shard);
                    cell.recency.lock().touch(key);
                    return Ok(state);
                }
            }
        }
        self.lazy_expire(cell, key, now);
        Ok(TtlState::Missing)
    }

    /// Clear the entire keyspace.
    ///
    /// All shard locks are held across the append and the clear, so no
    /// concurrent write can slip between the FLUSH record and the wipe
    /// and end up ordered differently in the log than in memory.
    pub fn flush(&self) -> Result<()> {
        let mut guards: Vec<_> = self.shards.iter().map(|cell| cell.data.write()).collect();
        self.wal.append(&WalOp::Flush)?;
        for guard in &mut guards {
            guard.clear();
        }
        drop(guards);
        for cell in &self.shards {
            cell.recency.lock().clear();
        }
        Ok(())
    }

    // ========================================================================
    // Sorted-set operations
    // ========================================================================

    /// Insert a member or update its score. Returns true when the member
    /// was newly added.
    pub fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> Result<bool> {
        if !score.is_finite() {
            return Err(Error::invalid_argument("score must be a finite number"));
        }
        let now = epoch_ms();
        let cell = self.cell(key);
        let mut guard = cell.data.write();
        let shard = &mut *guard;

        if shard.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.expire_remove_locked(cell, shard, key)?;
        }

        match shard.entries.get_mut(key) {
            None => {
                if shard.entries.len() >= self.quota {
                    self.evict_one(cell, shard, now)?;
                }
                self.wal.append(&WalOp::ZAdd {
                    key: key.to_vec(),
                    member: member.to_vec(),
                    score,
                })?;
                let mut zset = SortedSet::new();
                zset.insert(member, score);
                shard.install(key.to_vec(), Entry::new(Value::ZSet(zset), now, None));
                cell.recency.lock().touch(key);
                Ok(true)
            }
            Some(entry) => match &mut entry.value {
                Value::ZSet(zset) => {
                    if zset
                        .score(member)
                        .is_some_and(|s| s.total_cmp(&score) == Ordering::Equal)
                    {
                        return Ok(false);
                    }
                    self.wal.append(&WalOp::ZAdd {
                        key: key.to_vec(),
                        member: member.to_vec(),
                        score,
                    })?;
                    let added = zset.insert(member, score);
                    entry.touch(now);
                    cell.recency.lock().touch(key);
                    Ok(added)
                }
                other => Err(Error::wrong_type("zset", other.type_name())),
            },
        }
    }

    /// Remove a member. Removing the last member drops the whole key.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let now = epoch_ms();
        let cell = self.cell(key);
        let mut guard = cell.data.write();
        let shard = &mut *guard;

        if shard.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.expire_remove_locked(cell, shard, key)?;
            return Ok(false);
        }

        let now_empty = match shard.entries.get_mut(key) {
            None => return Ok(false),
            Some(entry) => match &mut entry.value {
                Value::ZSet(zset) => {
                    if zset.score(member).is_none() {
                        return Ok(false);
                    }
                    self.wal.append(&WalOp::ZRem {
                        key: key.to_vec(),
                        member: member.to_vec(),
                    })?;
                    zset.remove(member);
                    let empty = zset.is_empty();
                    entry.touch(now);
                    empty
                }
                other => return Err(Error::wrong_type("zset", other.type_name())),
            },
        };

        if now_empty {
            shard.remove(key);
            cell.recency.lock().remove(key);
        } else {
            cell.recency.lock().touch(key);
        }
        Ok(true)
    }

    /// Score of a member.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        Ok(self.with_zset(key, |zset| zset.score(member))?.flatten())
    }

    /// Zero-based ascending rank of a member.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        Ok(self.with_zset(key, |zset| zset.rank(member))?.flatten())
    }

    /// Zero-based descending rank of a member.
    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> Result<Option<usize>> {
        Ok(self.with_zset(key, |zset| zset.rev_rank(member))?.flatten())
    }

    /// Members by ascending rank over the inclusive range [start, stop].
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .with_zset(key, |zset| {
                zset.range(start, stop).into_iter().map(|(m, _)| m).collect()
            })?
            .unwrap_or_default())
    }

    /// Members by descending rank over the inclusive range [start, stop].
    pub fn zrevrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .with_zset(key, |zset| {
                zset.rev_range(start, stop)
                    .into_iter()
                    .map(|(m, _)| m)
                    .collect()
            })?
            .unwrap_or_default())
    }

    /// Member count of a sorted set (0 when the key is absent).
    pub fn zcard(&self, key: &[u8]) -> Result<usize> {
        Ok(self.with_zset(key, |zset| zset.len())?.unwrap_or(0))
    }

    fn with_zset<T>(&self, key: &[u8], f: impl FnOnce(&SortedSet) -> T) -> Result<Option<T>> {
        let now = epoch_ms();
        let cell = self.cell(key);
        {
            let shard = cell.data.read();
            match shard.entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_expired(now) => {}
                Some(entry) => match &entry.value {
                    Value::ZSet(zset) => {
                        entry.touch(now);
                        let out = f(zset);
                        drop(shard);
                        cell.recency.lock().touch(key);
                        return Ok(Some(out));
                    }
                    other => return Err(Error::wrong_type("zset", other.type_name())),
                },
            }
        }
        self.lazy_expire(cell, key, now);
        Ok(None)
    }

    // ========================================================================
    // Keyspace queries
    // ========================================================================

    /// Live keys, optionally filtered by a glob pattern (`*`, `?`).
    /// Results are sorted for deterministic output.
    pub fn keys(&self, pattern: Option<&[u8]>) -> Vec<Vec<u8>> {
        let now = epoch_ms();
        let mut out = Vec::new();
        for cell in &self.shards {
            let shard = cell.data.read();
            for (key, entry) in &shard.entries {
                if entry.is_expired(now) {
                    continue;
                }
                if pattern.map_or(true, |p| glob_match(p, key)) {
                    out.push(key.clone());
                }
            }
        }
        out.sort();
        out
    }

    /// Number of live entries across all shards.
    pub fn size(&self) -> usize {
        let now = epoch_ms();
        self.shards
            .iter()
            .map(|cell| cell.data.read().live_len(now))
            .sum()
    }

    /// Counter snapshot plus live per-shard sizes.
    pub fn stats(&self) -> StatsSnapshot {
        let now = epoch_ms();
        let sizes = self
            .shards
            .iter()
            .map(|cell| cell.data.read().live_len(now))
            .collect();
        self.stats.snapshot(sizes)
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Remove every entry whose deadline has passed. Returns the number of
    /// entries removed. Called by the background sweeper.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        for cell in &self.shards {
            let due = cell.data.read().ttl.expired_before(now_ms);
            for key in due {
                if self.lazy_expire(cell, &key, now_ms) {
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove `key` if it is present and expired, logging an
    /// EXPIRE_REMOVE record first so recovery cannot resurrect it.
    fn lazy_expire(&self, cell: &ShardCell, key: &[u8], now_ms: u64) -> bool {
        let mut guard = cell.data.write();
        let shard = &mut *guard;
        match shard.entries.get(key) {
            Some(entry) if entry.is_expired(now_ms) => {
                match self.expire_remove_locked(cell, shard, key) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "failed to log expiration removal; leaving entry for a later sweep"
                        );
                        false
                    }
                }
            }
            _ => false,
        }
    }

    /// Caller holds the shard write lock and has verified the entry is
    /// expired.
    fn expire_remove_locked(&self, cell: &ShardCell, shard: &mut Shard, key: &[u8]) -> Result<()> {
        self.wal.append(&WalOp::ExpireRemove { key: key.to_vec() })?;
        shard.remove(key);
        cell.recency.lock().remove(key);
        self.stats.record_expiration();
        Ok(())
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Free one slot in a shard that is at quota, logging the removal.
    fn evict_one(&self, cell: &ShardCell, shard: &mut Shard, now_ms: u64) -> Result<()> {
        loop {
            let Some(victim) = self.select_victim(cell, shard, now_ms) else {
                return Ok(());
            };
            if !shard.entries.contains_key(&victim) {
                // A read touched this key after it lost a race with
                // removal; the recency list can carry such ghosts.
                cell.recency.lock().remove(&victim);
                continue;
            }
            self.wal.append(&WalOp::Del {
                key: victim.clone(),
            })?;
            shard.remove(&victim);
            cell.recency.lock().remove(&victim);
            self.stats.record_eviction();
            return Ok(());
        }
    }

    fn select_victim(&self, cell: &ShardCell, shard: &Shard, _now_ms: u64) -> Option<Vec<u8>> {
        use cachegrid_core::EvictionPolicy::*;
        match self.config.eviction_policy {
            Lru => {
                let recency = cell.recency.lock();
                recency.peek_lru().map(|k| k.to_vec())
            }
            Lfu => shard
                .entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.access_count()
                        .cmp(&b.access_count())
                        .then(a.created_at_ms.cmp(&b.created_at_ms))
                })
                .map(|(k, _)| k.clone()),
            Random => {
                let len = shard.entries.len();
                if len == 0 {
                    return None;
                }
                let pick = rand::thread_rng().gen_range(0..len);
                shard.entries.keys().nth(pick).cloned()
            }
            Ttl => shard.ttl.soonest().cloned().or_else(|| {
                // Nothing carries an expiration; fall back to the oldest
                // entry so no-TTL keys are evicted last.
                shard
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at_ms)
                    .map(|(k, _)| k.clone())
            }),
        }
    }

    // ========================================================================
    // Recovery hooks
    // ========================================================================

    /// Apply a logged op during WAL replay. Replay never re-logs and never
    /// evicts: evictions were themselves logged as DEL records.
    pub fn apply_replay(&self, op: &WalOp, timestamp_ms: u64) {
        match op {
            WalOp::Set {
                key,
                value,
                expires_at_ms,
            } => {
                let cell = self.cell(key);
                cell.data.write().install(
                    key.clone(),
                    Entry::new(Value::Str(value.clone()), timestamp_ms, *expires_at_ms),
                );
                cell.recency.lock().touch(key);
            }
            WalOp::Del { key } | WalOp::ExpireRemove { key } => {
                let cell = self.cell(key);
                cell.data.write().remove(key);
                cell.recency.lock().remove(key);
            }
            WalOp::Expire {
                key,
                expires_at_ms,
            } => {
                let cell = self.cell(key);
                cell.data.write().set_expiry(key, Some(*expires_at_ms));
            }
            WalOp::ZAdd { key, member, score } => {
                let cell = self.cell(key);
                let mut guard = cell.data.write();
                let shard = &mut *guard;
                match shard.entries.get_mut(key) {
                    Some(entry) => match &mut entry.value {
                        Value::ZSet(zset) => {
                            zset.insert(member, *score);
                        }
                        other => {
                            tracing::warn!(
                                kind = other.type_name(),
                                "ZADD replayed over a non-zset entry; replacing it"
                            );
                            let mut zset = SortedSet::new();
                            zset.insert(member, *score);
                            shard.install(
                                key.clone(),
                                Entry::new(Value::ZSet(zset), timestamp_ms, None),
                            );
                        }
                    },
                    None => {
                        let mut zset = SortedSet::new();
                        zset.insert(member, *score);
                        shard.install(
                            key.clone(),
                            Entry::new(Value::ZSet(zset), timestamp_ms, None),
                        );
                    }
                }
                drop(guard);
                cell.recency.lock().touch(key);
            }
            WalOp::ZRem { key, member } => {
                let cell = self.cell(key);
                let mut guard = cell.data.write();
                let shard = &mut *guard;
                let now_empty = match shard.entries.get_mut(key) {
                    Some(entry) => match &mut entry.value {
                        Value::ZSet(zset) => {
                            zset.remove(member);
                            zset.is_empty()
                        }
                        _ => false,
                    },
                    None => false,
                };
                if now_empty {
                    shard.remove(key);
                    drop(guard);
                    cell.recency.lock().remove(key);
                }
            }
            WalOp::Flush => {
                for cell in &self.shards {
                    cell.data.write().clear();
                    cell.recency.lock().clear();
                }
            }
        }
    }

    /// Install an entry loaded from a snapshot.
    pub fn load_entry(&self, key: Vec<u8>, entry: Entry) {
        let cell = self.cell(&key);
        let mut guard = cell.data.write();
        guard.install(key.clone(), entry);
        drop(guard);
        cell.recency.lock().touch(&key);
    }

    /// Copy out every live entry, one shard at a time. Each shard's copy
    /// is taken under its read lock, giving a consistent per-shard view.
    pub fn dump(&self) -> Vec<(Vec<u8>, Entry)> {
        let now = epoch_ms();
        let mut out = Vec::new();
        for cell in &self.shards {
            let shard = cell.data.read();
            for (key, entry) in &shard.entries {
                if !entry.is_expired(now) {
                    out.push((key.clone(), entry.clone()));
                }
            }
        }
        out
    }
}

/// Glob match supporting `*` (any run) and `?` (any single byte).
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_t = 0usize;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
