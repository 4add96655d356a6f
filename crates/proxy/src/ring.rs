//! Consistent-hash ring
//!
//! Each node owns V virtual positions at `xxh64("<id>#<i>")`. A key maps
//! to the node owning the smallest position at or above `xxh64(key)`,
//! wrapping around. Lookup is a pure function of (key, membership):
//! adding or removing a node only moves the keys whose successor changed,
//! about 1/N of the keyspace.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use cachegrid_core::{hash_key, ring_point, Error, Result};

/// Default virtual positions per node.
pub const DEFAULT_VNODES: u32 = 150;

/// Immutable ring over a membership set.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: BTreeMap<u64, String>,
    nodes: Vec<String>,
    vnodes: u32,
}

impl HashRing {
    /// Build a ring. Node order does not matter: the member list is
    /// sorted first so identical memberships always produce identical
    /// rings.
    pub fn build(node_ids: &[String], vnodes: u32) -> HashRing {
        let mut nodes: Vec<String> = node_ids.to_vec();
        nodes.sort();
        nodes.dedup();

        let mut points = BTreeMap::new();
        for node in &nodes {
            for replica in 0..vnodes {
                points.insert(ring_point(node, replica), node.clone());
            }
        }
        HashRing {
            points,
            nodes,
            vnodes,
        }
    }

    /// Node owning `key`, or `None` on an empty ring.
    pub fn node_for(&self, key: &[u8]) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_key(key);
        self.points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node.as_str())
    }

    /// Members, sorted.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Virtual positions per node.
    pub fn vnodes(&self) -> u32 {
        self.vnodes
    }
}

/// Shared, atomically swappable ring.
///
/// Readers clone an `Arc` to the current ring; membership changes build a
/// whole new ring and swap it in, so a reader sees either the old or the
/// new ring, never a partial one.
pub struct Router {
    ring: RwLock<Arc<HashRing>>,
    vnodes: u32,
}

impl Router {
    /// Create a router over an initial membership.
    pub fn new(node_ids: &[String], vnodes: u32) -> Router {
        Router {
            ring: RwLock::new(Arc::new(HashRing::build(node_ids, vnodes))),
            vnodes,
        }
    }

    /// Node owning `key`.
    pub fn lookup(&self, key: &[u8]) -> Result<String> {
        self.current()
            .node_for(key)
            .map(|n| n.to_string())
            .ok_or(Error::NoAvailableNodes)
    }

    /// Replace the membership atomically.
    pub fn set_nodes(&self, node_ids: &[String]) {
        let ring = Arc::new(HashRing::build(node_ids, self.vnodes));
        *self.ring.write() = ring;
    }

    /// Snapshot of the current ring.
    pub fn current(&self) -> Arc<HashRing> {
        Arc::clone(&self.ring.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_ring_maps_nothing() {
        let ring = HashRing::build(&[], DEFAULT_VNODES);
        assert!(ring.is_empty());
        assert_eq!(ring.node_for(b"any"), None);
    }

    #[test]
    fn single_node_owns_everything() {
        let ring = HashRing::build(&nodes(&["n1"]), DEFAULT_VNODES);
        for i in 0..200 {
            assert_eq!(ring.node_for(format!("key-{i}").as_bytes()), Some("n1"));
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let a = HashRing::build(&nodes(&["n1", "n2", "n3"]), DEFAULT_VNODES);
        let b = HashRing::build(&nodes(&["n3", "n1", "n2"]), DEFAULT_VNODES);
        for i in 0..500 {
            let key = format!("key-{i}");
            assert_eq!(a.node_for(key.as_bytes()), b.node_for(key.as_bytes()));
        }
    }

    #[test]
    fn removing_a_node_only_moves_its_keys() {
        let before = HashRing::build(&nodes(&["n1", "n2", "n3"]), DEFAULT_VNODES);
        let after = HashRing::build(&nodes(&["n1", "n3"]), DEFAULT_VNODES);

        for i in 0..100 {
            let key = format!("user:{i}");
            let owner_before = before.node_for(key.as_bytes()).unwrap();
            let owner_after = after.node_for(key.as_bytes()).unwrap();
            if owner_before != "n2" {
                assert_eq!(owner_before, owner_after, "stable key {key} moved");
            } else {
                assert_ne!(owner_after, "n2");
            }
        }
    }

    #[test]
    fn adding_a_node_moves_roughly_one_nth() {
        let before = HashRing::build(&nodes(&["n1", "n2", "n3"]), DEFAULT_VNODES);
        let after = HashRing::build(&nodes(&["n1", "n2", "n3", "n4"]), DEFAULT_VNODES);

        let total = 4000;
        let moved = (0..total)
            .filter(|i| {
                let key = format!("key-{i}");
                before.node_for(key.as_bytes()) != after.node_for(key.as_bytes())
            })
            .count();

        // Expect ≈ 1/4 of keys to move; allow a generous band.
        let expected = total / 4;
        assert!(
            moved > expected / 2 && moved < expected * 2,
            "moved {moved} of {total}, expected ≈{expected}"
        );
    }

    #[test]
    fn load_spreads_over_members() {
        let ring = HashRing::build(&nodes(&["n1", "n2", "n3", "n4"]), DEFAULT_VNODES);
        let mut counts = std::collections::HashMap::new();
        for i in 0..8000 {
            let owner = ring.node_for(format!("key-{i}").as_bytes()).unwrap();
            *counts.entry(owner.to_string()).or_insert(0usize) += 1;
        }
        for (node, count) in &counts {
            // Perfect balance would be 2000 per node.
            assert!(
                *count > 1000 && *count < 3200,
                "{node} badly unbalanced: {count}"
            );
        }
    }

    #[test]
    fn router_reports_no_available_nodes() {
        let router = Router::new(&[], DEFAULT_VNODES);
        assert!(matches!(
            router.lookup(b"k"),
            Err(Error::NoAvailableNodes)
        ));
    }

    #[test]
    fn router_swaps_membership_atomically() {
        let router = Router::new(&nodes(&["n1"]), DEFAULT_VNODES);
        assert_eq!(router.lookup(b"k").unwrap(), "n1");
        router.set_nodes(&nodes(&["n2"]));
        assert_eq!(router.lookup(b"k").unwrap(), "n2");
        let snapshot = router.current();
        assert_eq!(snapshot.nodes(), &["n2".to_string()]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn lookup_is_pure(key in proptest::collection::vec(any::<u8>(), 0..64)) {
                let ring = HashRing::build(&nodes(&["a", "b", "c"]), 50);
                let first = ring.node_for(&key).map(|s| s.to_string());
                let second = ring.node_for(&key).map(|s| s.to_string());
                prop_assert_eq!(first, second);
            }
        }
    }
}
