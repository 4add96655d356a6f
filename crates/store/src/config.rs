//! Store configuration

use std::time::Duration;

use cachegrid_core::{Error, EvictionPolicy, Result};

/// Configuration for a [`crate::PartitionedStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of shards; must be a nonzero power of two
    pub shards: usize,
    /// Total entry quota across all shards; each shard gets `max_size / shards`
    pub max_size: usize,
    /// Victim selection policy when a shard is at quota
    pub eviction_policy: EvictionPolicy,
    /// Upper bound on a single string value
    pub max_value_bytes: usize,
    /// Cadence of the background expiry sweeper
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            shards: 16,
            max_size: 1_000_000,
            eviction_policy: EvictionPolicy::Lru,
            max_value_bytes: 64 * 1024 * 1024,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Set the shard count.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set the total entry quota.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Set the per-value byte cap.
    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    /// Set the sweeper cadence.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validate invariants the hot path relies on.
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 || !self.shards.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "shard count must be a nonzero power of two, got {}",
                self.shards
            )));
        }
        if self.max_size == 0 {
            return Err(Error::invalid_argument("max size must be nonzero"));
        }
        if self.max_value_bytes == 0 {
            return Err(Error::invalid_argument("max value bytes must be nonzero"));
        }
        Ok(())
    }

    /// Per-shard entry quota.
    pub fn shard_quota(&self) -> usize {
        (self.max_size / self.shards).max(1)
    }
}
