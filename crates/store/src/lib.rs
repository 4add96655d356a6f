//! Partitioned in-memory store
//!
//! The keyspace is statically split into P shards by stable hash. Each
//! shard is single-writer: every mutation for a key runs inside its shard's
//! critical section, and the WAL append for that mutation happens inside
//! the same critical section so log order matches apply order per shard.
//! Reads take the shard read lock and record access metadata through
//! per-entry atomics.
//!
//! Modules:
//! - `store`: the [`PartitionedStore`] and its operation surface
//! - `shard`: per-shard map + TTL index
//! - `recency`: arena-backed LRU list
//! - `ttl`: expiry → keys index
//! - `sweeper`: background expiry sweeper thread
//! - `stats`: atomic hit/miss/eviction/expiration counters

#![warn(clippy::all)]

pub mod config;
mod recency;
mod shard;
pub mod stats;
pub mod store;
pub mod sweeper;
mod ttl;

pub use config::StoreConfig;
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{PartitionedStore, TtlState};
pub use sweeper::ExpirySweeper;
