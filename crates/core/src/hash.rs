//! Stable hashing for shard and ring placement
//!
//! Both the per-node shard selection and the consistent-hash ring use
//! xxHash-64 with a fixed seed so that placement is identical across
//! processes, restarts, and architectures. Changing either function
//! invalidates every persisted placement decision in a cluster.

use xxhash_rust::xxh64::xxh64;

/// Seed for all placement hashing. Never change this.
const PLACEMENT_SEED: u64 = 0;

/// Hash a key for placement decisions.
#[inline]
pub fn hash_key(key: &[u8]) -> u64 {
    xxh64(key, PLACEMENT_SEED)
}

/// Shard index for a key within a node.
///
/// `shards` must be a power of two; the caller validates this once at
/// config time so the hot path can mask instead of divide.
#[inline]
pub fn shard_index(key: &[u8], shards: usize) -> usize {
    debug_assert!(shards.is_power_of_two());
    (hash_key(key) & (shards as u64 - 1)) as usize
}

/// Ring position for one virtual node.
///
/// The position of replica `i` of node `node_id` is the hash of the
/// literal string `"<node_id>#<i>"`.
#[inline]
pub fn ring_point(node_id: &str, replica: u32) -> u64 {
    let mut buf = Vec::with_capacity(node_id.len() + 11);
    buf.extend_from_slice(node_id.as_bytes());
    buf.push(b'#');
    buf.extend_from_slice(replica.to_string().as_bytes());
    xxh64(&buf, PLACEMENT_SEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(hash_key(b"user:1"), hash_key(b"user:1"));
        assert_ne!(hash_key(b"user:1"), hash_key(b"user:2"));
    }

    #[test]
    fn shard_index_masks_into_range() {
        for i in 0..1000 {
            let key = format!("key-{i}");
            let idx = shard_index(key.as_bytes(), 16);
            assert!(idx < 16);
        }
    }

    #[test]
    fn shard_index_spreads_keys() {
        let mut counts = [0usize; 8];
        for i in 0..8000 {
            let key = format!("key-{i}");
            counts[shard_index(key.as_bytes(), 8)] += 1;
        }
        // Every shard should see a reasonable share of 8000 uniform keys.
        for c in counts {
            assert!(c > 500, "shard badly underloaded: {c}");
        }
    }

    #[test]
    fn ring_point_matches_string_form() {
        use xxhash_rust::xxh64::xxh64;
        assert_eq!(ring_point("node-a", 7), xxh64(b"node-a#7", 0));
    }

    #[test]
    fn ring_points_differ_per_replica() {
        assert_ne!(ring_point("n1", 0), ring_point("n1", 1));
        assert_ne!(ring_point("n1", 0), ring_point("n2", 0));
    }
}
