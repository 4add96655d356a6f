//! Mutation vocabulary shared between the store and the durability layer
//!
//! Every state-changing operation is described by a [`WalOp`] and appended
//! through a [`WalSink`] *before* the in-memory state reflects it, inside
//! the owning shard's critical section. The durability crate provides the
//! real file-backed sink; [`NoopWalSink`] serves tests and nodes running
//! with persistence disabled.

use crate::error::Result;

/// One logged mutation.
///
/// Expirations are recorded as absolute wall-clock milliseconds so that
/// replaying the log hours later reconstructs the same deadlines instead
/// of restarting relative TTLs.
#[derive(Debug, Clone, PartialEq)]
pub enum WalOp {
    /// Install a string value, replacing whatever was there
    Set {
        /// Target key
        key: Vec<u8>,
        /// Raw value bytes
        value: Vec<u8>,
        /// Absolute expiration, if the write carried a TTL
        expires_at_ms: Option<u64>,
    },
    /// Remove a key (client DEL or an eviction victim)
    Del {
        /// Target key
        key: Vec<u8>,
    },
    /// Set or replace a key's absolute expiration
    Expire {
        /// Target key
        key: Vec<u8>,
        /// Absolute expiration deadline
        expires_at_ms: u64,
    },
    /// Removal of an entry observed to be past its expiration.
    ///
    /// Logged by both the sweeper and lazy-expiry reads so recovery
    /// cannot resurrect a key that was already seen as dead.
    ExpireRemove {
        /// Target key
        key: Vec<u8>,
    },
    /// Insert or rescore a sorted-set member
    ZAdd {
        /// Target key
        key: Vec<u8>,
        /// Member bytes
        member: Vec<u8>,
        /// Member score
        score: f64,
    },
    /// Remove a sorted-set member (removing the last member drops the key)
    ZRem {
        /// Target key
        key: Vec<u8>,
        /// Member bytes
        member: Vec<u8>,
    },
    /// Clear the entire keyspace
    Flush,
}

impl WalOp {
    /// Short op-code name, used in logs and stats.
    pub fn kind(&self) -> &'static str {
        match self {
            WalOp::Set { .. } => "SET",
            WalOp::Del { .. } => "DEL",
            WalOp::Expire { .. } => "EXPIRE",
            WalOp::ExpireRemove { .. } => "EXPIRE_REMOVE",
            WalOp::ZAdd { .. } => "ZADD",
            WalOp::ZRem { .. } => "ZREM",
            WalOp::Flush => "FLUSH",
        }
    }

    /// Key this op targets, if any.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            WalOp::Set { key, .. }
            | WalOp::Del { key }
            | WalOp::Expire { key, .. }
            | WalOp::ExpireRemove { key }
            | WalOp::ZAdd { key, .. }
            | WalOp::ZRem { key, .. } => Some(key),
            WalOp::Flush => None,
        }
    }
}

/// Destination for logged mutations.
///
/// `append` must make the record durable (to the sink's configured degree)
/// before returning; the store treats a returned error as "the mutation
/// never happened" and leaves memory untouched.
pub trait WalSink: Send + Sync {
    /// Append one op; returns the sequence number assigned to it.
    fn append(&self, op: &WalOp) -> Result<u64>;
}

/// Sink that drops every record; used by tests and persistence-disabled
/// nodes.
#[derive(Debug, Default)]
pub struct NoopWalSink;

impl WalSink for NoopWalSink {
    fn append(&self, _op: &WalOp) -> Result<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_kind_names() {
        let op = WalOp::Set {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            expires_at_ms: None,
        };
        assert_eq!(op.kind(), "SET");
        assert_eq!(WalOp::Flush.kind(), "FLUSH");
    }

    #[test]
    fn op_key_accessor() {
        let op = WalOp::ZRem {
            key: b"board".to_vec(),
            member: b"p1".to_vec(),
        };
        assert_eq!(op.key(), Some(&b"board"[..]));
        assert_eq!(WalOp::Flush.key(), None);
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let sink = NoopWalSink;
        let seq = sink.append(&WalOp::Del { key: b"k".to_vec() }).unwrap();
        assert_eq!(seq, 0);
    }
}
