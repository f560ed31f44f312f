//! Consistent-hash placement on the fixed `[1, 1000]` key ring.
//!
//! Pure functions only — no locks, no I/O. Every caller supplies the live
//! view `L` (sorted ascending node ids) explicitly rather than this module
//! reading the membership table itself, so the placement math stays
//! trivially testable.

use crate::config::RING_SIZE;
use crate::types::NodeId;
use sha2::{Digest, Sha256};

/// `key(name) = SHA256(name) mod 1000 + 1`, landing in `[1, 1000]`.
///
/// Matches the original file server's `HashKey`: hash to bytes, interpret as
/// a big unsigned integer, reduce mod 1000, add 1.
pub fn key(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut acc: u64 = 0;
    for byte in digest {
        // Widening byte-at-a-time reduction mod 1000, equivalent to
        // interpreting the full digest as a big-endian integer and taking
        // it mod 1000 without needing bignum arithmetic.
        acc = (acc * 256 + byte as u64) % RING_SIZE;
    }
    acc + 1
}

/// Ring distance used to pick the primary: the node minimizing
/// `(id * 100 + 1000 - k) mod 1000` is the first node at or after `k` in ring
/// order (ties broken by the smallest such distance, matching a single
/// clockwise walk from `k`).
fn ring_distance(id: NodeId, k: u64) -> u64 {
    ((id.0 as u64) * 100 + RING_SIZE - k) % RING_SIZE
}

/// The primary for key `k` given the live, sorted node-id view `live`: the
/// member minimizing `ring_distance`. Returns `None` if `live` is empty.
pub fn primary(k: u64, live: &[NodeId]) -> Option<NodeId> {
    live.iter().copied().min_by_key(|&id| ring_distance(id, k))
}

/// The `n` ring successors of `owner` within `live` (sorted ascending node
/// ids), wrapping around. Excludes `owner` itself. If `owner` is not present
/// in `live`, it is treated as if inserted at its ring position for the
/// purposes of finding the cut point.
pub fn successors(owner: NodeId, live: &[NodeId], n: usize) -> Vec<NodeId> {
    if live.is_empty() {
        return Vec::new();
    }
    let start = live.iter().position(|&id| id >= owner).unwrap_or(0);
    let mut out = Vec::with_capacity(n.min(live.len()));
    let mut idx = start;
    // Skip owner itself if present at `start`.
    if live.get(idx) == Some(&owner) {
        idx = (idx + 1) % live.len();
    }
    while out.len() < n && out.len() < live.len().saturating_sub(1) {
        out.push(live[idx]);
        idx = (idx + 1) % live.len();
    }
    out
}

/// The `n` ring predecessors of `owner` within `live`, nearest first.
/// Excludes `owner` itself.
pub fn predecessors(owner: NodeId, live: &[NodeId], n: usize) -> Vec<NodeId> {
    if live.is_empty() {
        return Vec::new();
    }
    let start = live.iter().position(|&id| id >= owner).unwrap_or(live.len());
    let mut out = Vec::with_capacity(n.min(live.len()));
    let mut idx = (start + live.len() - 1) % live.len();
    while out.len() < n && out.len() < live.len().saturating_sub(1) {
        if live[idx] == owner {
            idx = (idx + live.len() - 1) % live.len();
            continue;
        }
        out.push(live[idx]);
        idx = (idx + live.len() - 1) % live.len();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(raw: &[u32]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId).collect()
    }

    #[test]
    fn key_is_in_range() {
        for name in ["a", "file.txt", "", "the quick brown fox", "節點"] {
            let k = key(name);
            assert!((1..=1000).contains(&k), "key({name}) = {k} out of range");
        }
    }

    #[test]
    fn key_is_deterministic() {
        assert_eq!(key("stable-name"), key("stable-name"));
    }

    #[test]
    fn primary_of_empty_view_is_none() {
        assert_eq!(primary(500, &[]), None);
    }

    #[test]
    fn successors_exclude_owner_and_wrap() {
        let live = ids(&[1, 2, 3, 4, 5]);
        let succ = successors(NodeId(4), &live, 3);
        assert_eq!(succ, ids(&[5, 1, 2]));
        assert!(!succ.contains(&NodeId(4)));
    }

    #[test]
    fn predecessors_exclude_owner_and_wrap() {
        let live = ids(&[1, 2, 3, 4, 5]);
        let pred = predecessors(NodeId(1), &live, 2);
        assert_eq!(pred, ids(&[5, 4]));
    }

    #[test]
    fn successors_cap_at_view_size_minus_one() {
        let live = ids(&[1, 2]);
        let succ = successors(NodeId(1), &live, 3);
        assert_eq!(succ, ids(&[2]));
    }

    proptest! {
        #[test]
        fn primary_is_always_a_member_of_the_view(
            mut raw in proptest::collection::hash_set(1u32..=10, 1..10),
            k in 1u64..=1000,
        ) {
            let mut raw: Vec<u32> = raw.drain().collect();
            raw.sort_unstable();
            let live = ids(&raw);
            let p = primary(k, &live).expect("non-empty view has a primary");
            prop_assert!(live.contains(&p));
        }

        #[test]
        fn primary_is_identical_across_identical_views(
            mut raw in proptest::collection::hash_set(1u32..=10, 1..10),
            k in 1u64..=1000,
        ) {
            let mut raw: Vec<u32> = raw.drain().collect();
            raw.sort_unstable();
            let live = ids(&raw);
            let p1 = primary(k, &live);
            let p2 = primary(k, &live);
            prop_assert_eq!(p1, p2);
        }

        #[test]
        fn successors_never_contain_duplicates_or_owner(
            mut raw in proptest::collection::hash_set(1u32..=10, 2..10),
            owner_idx in 0usize..10,
        ) {
            let mut raw: Vec<u32> = raw.drain().collect();
            raw.sort_unstable();
            let owner = NodeId(raw[owner_idx % raw.len()]);
            let succ = successors(owner, &ids(&raw), 3);
            let mut seen = std::collections::HashSet::new();
            for id in &succ {
                prop_assert_ne!(*id, owner);
                prop_assert!(seen.insert(*id), "duplicate successor {:?}", id);
            }
        }
    }
}
