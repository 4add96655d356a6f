//! Sorted set: member map + skip-list ordered index
//!
//! Two synchronized views over the same membership:
//!
//! - `map`: member → score, O(1) score lookups and existence checks
//! - `index`: skip list ordered by (score, member) with lexicographic
//!   member tie-break, O(log n) expected rank and range-by-rank
//!
//! Skip-list nodes live in an arena owned by the set; cross-references
//! between the views are integer indices, so dropping the set drops all
//! storage at once. Each node carries per-level spans (the number of
//! level-0 hops covered by each forward pointer), which is what makes rank
//! queries logarithmic instead of linear.

use std::cmp::Ordering;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Maximum skip-list height.
const MAX_LEVEL: usize = 32;

/// Level draw: 1-in-4 chance of growing one more level (p = 0.25).
const BRANCHING: u32 = 4;

/// Arena index of the head sentinel.
const HEAD: u32 = 0;

/// Null arena index.
const NIL: u32 = u32::MAX;

/// Total order over (score, member): score first (IEEE-754 total order),
/// member bytes break ties.
#[inline]
fn cmp_key(score_a: f64, member_a: &[u8], score_b: f64, member_b: &[u8]) -> Ordering {
    score_a
        .total_cmp(&score_b)
        .then_with(|| member_a.cmp(member_b))
}

#[derive(Debug, Clone)]
struct Node {
    member: Vec<u8>,
    score: f64,
    /// forward[i]: next node at level i (NIL at the tail)
    forward: Vec<u32>,
    /// span[i]: level-0 hops from this node to forward[i] (or to the list
    /// end when forward[i] is NIL)
    span: Vec<u32>,
}

impl Node {
    fn new(member: Vec<u8>, score: f64, level: usize) -> Self {
        Node {
            member,
            score,
            forward: vec![NIL; level],
            span: vec![0; level],
        }
    }
}

/// Skip list keyed by (score, member) with rank spans.
#[derive(Debug, Clone)]
struct SkipList {
    /// Node arena; index 0 is the head sentinel
    nodes: Vec<Node>,
    /// Recycled arena slots
    free: Vec<u32>,
    /// Current number of levels in use
    level: usize,
    len: usize,
    rng: SmallRng,
}

impl SkipList {
    fn new() -> Self {
        SkipList {
            nodes: vec![Node::new(Vec::new(), f64::NEG_INFINITY, MAX_LEVEL)],
            free: Vec::new(),
            level: 1,
            len: 0,
            rng: SmallRng::seed_from_u64(0x5c1b_11e7),
        }
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen_ratio(1, BRANCHING) {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, member: Vec<u8>, score: f64, level: usize) -> u32 {
        let node = Node::new(member, score, level);
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Insert a (score, member) pair. The caller guarantees the member is
    /// not already present.
    fn insert(&mut self, score: f64, member: &[u8]) {
        let mut update = [HEAD; MAX_LEVEL];
        let mut rank = [0u32; MAX_LEVEL];

        let mut x = HEAD;
        for lvl in (0..self.level).rev() {
            rank[lvl] = if lvl == self.level - 1 {
                0
            } else {
                rank[lvl + 1]
            };
            loop {
                let next = self.nodes[x as usize].forward[lvl];
                if next == NIL {
                    break;
                }
                let precedes = {
                    let n = &self.nodes[next as usize];
                    cmp_key(n.score, &n.member, score, member) == Ordering::Less
                };
                if !precedes {
                    break;
                }
                rank[lvl] += self.nodes[x as usize].span[lvl];
                x = next;
            }
            update[lvl] = x;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for lvl in self.level..new_level {
                rank[lvl] = 0;
                update[lvl] = HEAD;
                self.nodes[HEAD as usize].span[lvl] = self.len as u32;
            }
            self.level = new_level;
        }

        let idx = self.alloc(member.to_vec(), score, new_level);
        for lvl in 0..new_level {
            let u = update[lvl] as usize;
            let u_forward = self.nodes[u].forward[lvl];
            let u_span = self.nodes[u].span[lvl];
            let delta = rank[0] - rank[lvl];

            let node = &mut self.nodes[idx as usize];
            node.forward[lvl] = u_forward;
            node.span[lvl] = u_span - delta;

            let upstream = &mut self.nodes[u];
            upstream.forward[lvl] = idx;
            upstream.span[lvl] = delta + 1;
        }
        // Levels above the new node's height just got one more hop in
        // their gap.
        for lvl in new_level..self.level {
            self.nodes[update[lvl] as usize].span[lvl] += 1;
        }
        self.len += 1;
    }

    /// Remove an exact (score, member) pair. Returns false if absent.
    fn remove(&mut self, score: f64, member: &[u8]) -> bool {
        let mut update = [HEAD; MAX_LEVEL];

        let mut x = HEAD;
        for lvl in (0..self.level).rev() {
            loop {
                let next = self.nodes[x as usize].forward[lvl];
                if next == NIL {
                    break;
                }
                let precedes = {
                    let n = &self.nodes[next as usize];
                    cmp_key(n.score, &n.member, score, member) == Ordering::Less
                };
                if !precedes {
                    break;
                }
                x = next;
            }
            update[lvl] = x;
        }

        let target = self.nodes[update[0] as usize].forward[0];
        if target == NIL {
            return false;
        }
        {
            let n = &self.nodes[target as usize];
            if cmp_key(n.score, &n.member, score, member) != Ordering::Equal {
                return false;
            }
        }

        for lvl in 0..self.level {
            let u = update[lvl] as usize;
            if self.nodes[u].forward[lvl] == target {
                let t_forward = self.nodes[target as usize].forward[lvl];
                let t_span = self.nodes[target as usize].span[lvl];
                let upstream = &mut self.nodes[u];
                upstream.span[lvl] += t_span;
                upstream.span[lvl] -= 1;
                upstream.forward[lvl] = t_forward;
            } else {
                // Target sits inside this node's gap; the gap shrank by one.
                self.nodes[u].span[lvl] -= 1;
            }
        }

        while self.level > 1 && self.nodes[HEAD as usize].forward[self.level - 1] == NIL {
            self.nodes[HEAD as usize].span[self.level - 1] = 0;
            self.level -= 1;
        }

        self.nodes[target as usize] = Node::new(Vec::new(), 0.0, 0);
        self.free.push(target);
        self.len -= 1;
        true
    }

    /// Zero-based rank of an exact (score, member) pair.
    fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        let mut traversed: u64 = 0;
        for lvl in (0..self.level).rev() {
            loop {
                let next = self.nodes[x as usize].forward[lvl];
                if next == NIL {
                    break;
                }
                let le = {
                    let n = &self.nodes[next as usize];
                    cmp_key(n.score, &n.member, score, member) != Ordering::Greater
                };
                if !le {
                    break;
                }
                traversed += self.nodes[x as usize].span[lvl] as u64;
                x = next;
            }
            if x != HEAD {
                let n = &self.nodes[x as usize];
                if n.score.total_cmp(&score) == Ordering::Equal && n.member == member {
                    return Some((traversed - 1) as usize);
                }
            }
        }
        None
    }

    /// Arena index of the node at zero-based rank `r`.
    fn node_at_rank(&self, r: usize) -> Option<u32> {
        if r >= self.len {
            return None;
        }
        let want = (r + 1) as u64;
        let mut x = HEAD;
        let mut traversed: u64 = 0;
        for lvl in (0..self.level).rev() {
            loop {
                let next = self.nodes[x as usize].forward[lvl];
                if next == NIL {
                    break;
                }
                let span = self.nodes[x as usize].span[lvl] as u64;
                if traversed + span > want {
                    break;
                }
                traversed += span;
                x = next;
                if traversed == want {
                    return Some(x);
                }
            }
        }
        None
    }

    /// Members in rank order over the inclusive range [start, stop].
    fn range_by_rank(&self, start: usize, stop: usize) -> Vec<(&[u8], f64)> {
        let mut out = Vec::with_capacity(stop.saturating_sub(start) + 1);
        let Some(mut x) = self.node_at_rank(start) else {
            return out;
        };
        for _ in start..=stop {
            let n = &self.nodes[x as usize];
            out.push((n.member.as_slice(), n.score));
            x = n.forward[0];
            if x == NIL {
                break;
            }
        }
        out
    }

    fn iter(&self) -> SkipIter<'_> {
        SkipIter {
            list: self,
            cursor: self.nodes[HEAD as usize].forward[0],
        }
    }
}

struct SkipIter<'a> {
    list: &'a SkipList,
    cursor: u32,
}

impl<'a> Iterator for SkipIter<'a> {
    type Item = (&'a [u8], f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let n = &self.list.nodes[self.cursor as usize];
        self.cursor = n.forward[0];
        Some((n.member.as_slice(), n.score))
    }
}

/// Dual-view sorted set.
#[derive(Debug, Clone)]
pub struct SortedSet {
    map: FxHashMap<Vec<u8>, f64>,
    index: SkipList,
}

impl SortedSet {
    /// Create an empty sorted set.
    pub fn new() -> Self {
        SortedSet {
            map: FxHashMap::default(),
            index: SkipList::new(),
        }
    }

    /// Insert a member or update its score.
    ///
    /// Returns true when the member was newly added, false when an
    /// existing member was rescored. Updating to the same score is a
    /// no-op that also returns false.
    pub fn insert(&mut self, member: &[u8], score: f64) -> bool {
        match self.map.get(member) {
            Some(&old) if old.total_cmp(&score) == Ordering::Equal => false,
            Some(&old) => {
                self.index.remove(old, member);
                self.index.insert(score, member);
                self.map.insert(member.to_vec(), score);
                false
            }
            None => {
                self.index.insert(score, member);
                self.map.insert(member.to_vec(), score);
                true
            }
        }
    }

    /// Remove a member from both views. Returns false if absent.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.map.remove(member) {
            Some(score) => {
                let removed = self.index.remove(score, member);
                debug_assert!(removed, "index and map disagree on membership");
                true
            }
            None => false,
        }
    }

    /// Score of a member.
    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.map.get(member).copied()
    }

    /// Zero-based ascending rank of a member.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = self.score(member)?;
        self.index.rank(score, member)
    }

    /// Zero-based descending rank of a member.
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|r| self.len() - 1 - r)
    }

    /// Members by ascending rank over [start, stop], Redis index rules:
    /// negative indices count from the end, out-of-range clamps, and an
    /// empty range after clamping yields an empty result.
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        match clamp_range(self.len(), start, stop) {
            Some((lo, hi)) => self
                .index
                .range_by_rank(lo, hi)
                .into_iter()
                .map(|(m, s)| (m.to_vec(), s))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Members by descending rank over [start, stop].
    pub fn rev_range(&self, start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        match clamp_range(self.len(), start, stop) {
            Some((lo, hi)) => {
                // Descending rank r maps to ascending rank len-1-r, so the
                // window flips and the walk is reversed.
                let len = self.len();
                let mut out = self.index.range_by_rank(len - 1 - hi, len - 1 - lo);
                out.reverse();
                out.into_iter().map(|(m, s)| (m.to_vec(), s)).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.map.len(), self.index.len);
        self.map.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate members in (score, member) order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> + '_ {
        self.index.iter()
    }
}

impl Default for SortedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SortedSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((m1, s1), (m2, s2))| m1 == m2 && s1.total_cmp(&s2) == Ordering::Equal)
    }
}

impl Serialize for SortedSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for (m, s) in self.iter() {
            seq.serialize_element(&(m.to_vec(), s))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SortedSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(Vec<u8>, f64)>::deserialize(deserializer)?;
        let mut set = SortedSet::new();
        for (member, score) in pairs {
            if !score.is_finite() {
                return Err(D::Error::custom("non-finite score in sorted set"));
            }
            set.insert(&member, score);
        }
        Ok(set)
    }
}

/// Resolve Redis-style inclusive range indices against a set of `len`
/// members. Returns `None` when the resolved range is empty.
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let mut start = if start < 0 { start + len_i } else { start };
    let mut stop = if stop < 0 { stop + len_i } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len_i {
        stop = len_i - 1;
    }
    if start > stop || start >= len_i || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(pairs: &[(Vec<u8>, f64)]) -> Vec<&[u8]> {
        pairs.iter().map(|(m, _)| m.as_slice()).collect()
    }

    #[test]
    fn insert_and_score() {
        let mut set = SortedSet::new();
        assert!(set.insert(b"alice", 10.0));
        assert!(set.insert(b"bob", 5.0));
        assert_eq!(set.score(b"alice"), Some(10.0));
        assert_eq!(set.score(b"carol"), None);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rescore_returns_false_and_reorders() {
        let mut set = SortedSet::new();
        set.insert(b"a", 1.0);
        set.insert(b"b", 2.0);
        assert!(!set.insert(b"a", 3.0));
        assert_eq!(set.rank(b"a"), Some(1));
        assert_eq!(set.rank(b"b"), Some(0));
    }

    #[test]
    fn same_score_update_is_noop() {
        let mut set = SortedSet::new();
        set.insert(b"a", 1.0);
        assert!(!set.insert(b"a", 1.0));
        assert_eq!(set.len(), 1);
        assert_eq!(set.rank(b"a"), Some(0));
    }

    #[test]
    fn remove_keeps_views_in_sync() {
        let mut set = SortedSet::new();
        set.insert(b"a", 1.0);
        set.insert(b"b", 2.0);
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.score(b"a"), None);
        assert_eq!(set.rank(b"b"), Some(0));
    }

    #[test]
    fn rank_orders_by_score_then_member() {
        let mut set = SortedSet::new();
        set.insert(b"p1", 100.0);
        set.insert(b"p3", 120.0);
        set.insert(b"p2", 85.5);
        assert_eq!(set.rank(b"p2"), Some(0));
        assert_eq!(set.rank(b"p1"), Some(1));
        assert_eq!(set.rank(b"p3"), Some(2));
        assert_eq!(set.rev_rank(b"p3"), Some(0));
        assert_eq!(set.rev_rank(b"p1"), Some(1));
    }

    #[test]
    fn equal_scores_tie_break_on_member() {
        let mut set = SortedSet::new();
        set.insert(b"bravo", 7.0);
        set.insert(b"alpha", 7.0);
        set.insert(b"charlie", 7.0);
        assert_eq!(set.rank(b"alpha"), Some(0));
        assert_eq!(set.rank(b"bravo"), Some(1));
        assert_eq!(set.rank(b"charlie"), Some(2));
    }

    #[test]
    fn range_with_negative_indices() {
        let mut set = SortedSet::new();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            set.insert(m.as_bytes(), s);
        }
        assert_eq!(
            members(&set.range(0, -1)),
            vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..]]
        );
        assert_eq!(members(&set.range(-2, -1)), vec![&b"c"[..], &b"d"[..]]);
        assert_eq!(members(&set.range(1, 2)), vec![&b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn range_clamps_out_of_bounds() {
        let mut set = SortedSet::new();
        set.insert(b"a", 1.0);
        set.insert(b"b", 2.0);
        assert_eq!(members(&set.range(0, 100)), vec![&b"a"[..], &b"b"[..]]);
        assert_eq!(members(&set.range(-100, 0)), vec![&b"a"[..]]);
        assert!(set.range(5, 10).is_empty());
        assert!(set.range(1, 0).is_empty());
    }

    #[test]
    fn range_on_empty_set() {
        let set = SortedSet::new();
        assert!(set.range(0, -1).is_empty());
        assert!(set.rev_range(0, -1).is_empty());
    }

    #[test]
    fn rev_range_returns_descending() {
        let mut set = SortedSet::new();
        set.insert(b"p1", 100.0);
        set.insert(b"p3", 120.0);
        set.insert(b"p2", 85.5);
        assert_eq!(members(&set.rev_range(0, 0)), vec![&b"p3"[..]]);
        assert_eq!(
            members(&set.rev_range(0, -1)),
            vec![&b"p3"[..], &b"p1"[..], &b"p2"[..]]
        );
    }

    #[test]
    fn iter_is_sorted() {
        let mut set = SortedSet::new();
        for i in (0..50).rev() {
            set.insert(format!("m{i:02}").as_bytes(), i as f64);
        }
        let scores: Vec<f64> = set.iter().map(|(_, s)| s).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn large_set_ranks_are_consistent() {
        let mut set = SortedSet::new();
        for i in 0..500 {
            set.insert(format!("member-{i:04}").as_bytes(), (i % 97) as f64);
        }
        assert_eq!(set.len(), 500);
        // Rank of every member agrees with its position in iteration order.
        for (pos, (member, _)) in set.iter().enumerate() {
            assert_eq!(set.rank(member), Some(pos));
        }
    }

    #[test]
    fn remove_interleaved_with_insert_keeps_ranks() {
        let mut set = SortedSet::new();
        for i in 0..200 {
            set.insert(format!("m{i:03}").as_bytes(), i as f64);
        }
        for i in (0..200).step_by(2) {
            assert!(set.remove(format!("m{i:03}").as_bytes()));
        }
        assert_eq!(set.len(), 100);
        for (pos, (member, _)) in set.iter().enumerate() {
            assert_eq!(set.rank(member), Some(pos));
            assert_eq!(set.rev_rank(member), Some(99 - pos));
        }
    }

    #[test]
    fn serde_round_trip_preserves_order() {
        let mut set = SortedSet::new();
        set.insert(b"x", 3.25);
        set.insert(b"y", -1.0);
        set.insert(b"z", 3.25);
        let bytes = bincode::serialize(&set).unwrap();
        let back: SortedSet = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.rank(b"y"), Some(0));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn matches_reference_model(ops in proptest::collection::vec(
                (proptest::sample::select(vec!["add", "rem"]), 0u8..20, -100i64..100),
                1..200,
            )) {
                let mut set = SortedSet::new();
                let mut model: Vec<(Vec<u8>, f64)> = Vec::new();

                for (op, member, score) in ops {
                    let member = vec![b'm', member];
                    let score = score as f64;
                    match op {
                        "add" => {
                            set.insert(&member, score);
                            model.retain(|(m, _)| m != &member);
                            model.push((member, score));
                        }
                        _ => {
                            set.remove(&member);
                            model.retain(|(m, _)| m != &member);
                        }
                    }
                }

                model.sort_by(|(m1, s1), (m2, s2)| {
                    s1.total_cmp(s2).then_with(|| m1.cmp(m2))
                });

                prop_assert_eq!(set.len(), model.len());
                for (pos, (member, score)) in model.iter().enumerate() {
                    prop_assert_eq!(set.score(member), Some(*score));
                    prop_assert_eq!(set.rank(member), Some(pos));
                }
            }
        }
    }
}
