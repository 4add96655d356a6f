//! Tagged value sum stored under each key
//!
//! Command handlers match on the tag; an operation arriving for the wrong
//! tag is a WRONGTYPE error, not a panic. Only strings and sorted sets are
//! reachable from the supported command surface — the remaining tags are
//! part of the data model and the snapshot format.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::zset::SortedSet;

/// A stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Opaque byte string
    Str(Vec<u8>),
    /// List of byte strings
    List(VecDeque<Vec<u8>>),
    /// Unordered set of byte strings
    Set(HashSet<Vec<u8>>),
    /// Field → value mapping
    Hash(HashMap<Vec<u8>, Vec<u8>>),
    /// Sorted set (member map + ordered index)
    ZSet(SortedSet),
}

impl Value {
    /// Type tag name, as reported in WRONGTYPE errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::ZSet(_) => "zset",
        }
    }

    /// Approximate payload size in bytes, used by capacity accounting.
    pub fn payload_len(&self) -> usize {
        match self {
            Value::Str(b) => b.len(),
            Value::List(items) => items.iter().map(|i| i.len()).sum(),
            Value::Set(items) => items.iter().map(|i| i.len()).sum(),
            Value::Hash(fields) => fields.iter().map(|(k, v)| k.len() + v.len()).sum(),
            Value::ZSet(zset) => zset.iter().map(|(m, _)| m.len() + 8).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names() {
        assert_eq!(Value::Str(vec![]).type_name(), "string");
        assert_eq!(Value::ZSet(SortedSet::new()).type_name(), "zset");
        assert_eq!(Value::List(VecDeque::new()).type_name(), "list");
        assert_eq!(Value::Set(HashSet::new()).type_name(), "set");
        assert_eq!(Value::Hash(HashMap::new()).type_name(), "hash");
    }

    #[test]
    fn str_round_trips_through_bincode() {
        let value = Value::Str(b"hello".to_vec());
        let bytes = bincode::serialize(&value).unwrap();
        let back: Value = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn zset_round_trips_through_bincode() {
        let mut zset = SortedSet::new();
        zset.insert(b"alice", 10.0);
        zset.insert(b"bob", -3.5);
        let value = Value::ZSet(zset);
        let bytes = bincode::serialize(&value).unwrap();
        let back: Value = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn payload_len_counts_bytes() {
        assert_eq!(Value::Str(b"abcd".to_vec()).payload_len(), 4);
    }
}
