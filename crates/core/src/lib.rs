//! Core types for CacheGrid
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: tagged value sum stored under each key
//! - Entry: a keyed value plus access/expiry metadata
//! - SortedSet: dual-view sorted set (member map + skip-list ordered index)
//! - Error: shared error type hierarchy
//! - WalOp / WalSink: the mutation vocabulary the storage layer logs through
//! - EvictionPolicy and cluster node specs shared by the binaries
//! - Stable hashing helpers for shard and ring placement

#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;
pub mod wal;
pub mod value;
pub mod zset;

// Re-export commonly used types at the crate root
pub use cluster::{parse_cluster_nodes, NodeSpec};
pub use config::EvictionPolicy;
pub use entry::Entry;
pub use error::{Error, Result};
pub use hash::{hash_key, ring_point, shard_index};
pub use wal::{NoopWalSink, WalOp, WalSink};
pub use value::Value;
pub use zset::SortedSet;
