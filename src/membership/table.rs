//! In-memory membership table: `node_id -> Member`.
//!
//! Guarded by a single `parking_lot::RwLock` per §5 ("non-blocking under
//! their mutex" — all operations here are plain map manipulation, never a
//! network call while the lock is held).

use crate::types::{Member, MemberState, NodeId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Thread-safe table of cluster members, with the newer-wins merge rule
/// from `Member::merge_key` applied on every external update.
pub struct MembershipTable {
    members: RwLock<HashMap<NodeId, Member>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self { members: RwLock::new(HashMap::new()) }
    }

    /// Seed the table with a single known member (e.g. the local node at
    /// startup, or the introducer's address before a join completes).
    pub fn insert(&self, member: Member) {
        self.members.write().insert(member.id, member);
    }

    /// Apply an incoming member record using the newer-wins rule: a record
    /// replaces the stored one only if its `(incarnation, state_rank)` is
    /// strictly greater. Returns `true` if the table changed.
    pub fn update(&self, incoming: Member) -> bool {
        let mut guard = self.members.write();
        match guard.get(&incoming.id) {
            Some(current) if incoming.merge_key() <= current.merge_key() => false,
            _ => {
                guard.insert(incoming.id, incoming);
                true
            }
        }
    }

    /// Directly set a member's state and bump its incarnation, used by the
    /// local node to assert its own liveness (a self-update always wins
    /// since only the owner advances its own incarnation).
    pub fn set_self_state(&self, id: NodeId, state: MemberState, incarnation: u64) {
        let mut guard = self.members.write();
        if let Some(member) = guard.get_mut(&id) {
            member.state = state;
            member.incarnation = incarnation;
            member.last_change = chrono::Utc::now();
        }
    }

    pub fn get(&self, id: NodeId) -> Option<Member> {
        self.members.read().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.read().contains_key(&id)
    }

    /// All node ids currently in `Alive` state, sorted ascending — the ring
    /// view `L` the placement module operates on.
    pub fn alive_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .members
            .read()
            .values()
            .filter(|m| m.state == MemberState::Alive)
            .map(|m| m.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// All members currently tracked, regardless of state.
    pub fn all(&self) -> Vec<Member> {
        self.members.read().values().cloned().collect()
    }

    /// Pick one random alive member other than `exclude`, for direct-ping
    /// target selection. Returns `None` when no other member is `Alive`.
    pub fn random_member(&self, exclude: NodeId) -> Option<Member> {
        use rand::seq::SliceRandom;
        let guard = self.members.read();
        let candidates: Vec<&Member> =
            guard.values().filter(|m| m.id != exclude && m.state == MemberState::Alive).collect();
        candidates.choose(&mut rand::thread_rng()).map(|m| (*m).clone())
    }

    /// Sample up to `k` distinct alive members excluding the ids in
    /// `excludes`, for indirect-ping helper selection.
    pub fn sample(&self, k: usize, excludes: &[NodeId]) -> Vec<Member> {
        use rand::seq::SliceRandom;
        let guard = self.members.read();
        let mut candidates: Vec<&Member> = guard
            .values()
            .filter(|m| m.state == MemberState::Alive && !excludes.contains(&m.id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.into_iter().take(k).cloned().collect()
    }

    /// Serialize the table for the join protocol's `APPROVED <table>`
    /// response: one `id,address,state,incarnation,timestamp` record per
    /// line, `timestamp` being `last_change` as milliseconds since epoch.
    pub fn serialize(&self) -> String {
        let guard = self.members.read();
        let mut lines: Vec<String> = guard
            .values()
            .map(|m| {
                format!(
                    "{},{},{},{},{}",
                    m.id,
                    m.address,
                    m.state,
                    m.incarnation,
                    m.last_change.timestamp_millis()
                )
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Parse the wire form produced by `serialize` back into a table.
    pub fn parse(serialized: &str) -> crate::error::Result<Self> {
        let table = Self::new();
        for line in serialized.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.splitn(5, ',');
            let id: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| crate::error::Error::Malformed {
                    message: format!("bad membership record: '{}'", line),
                })?;
            let address = parts
                .next()
                .ok_or_else(|| crate::error::Error::Malformed {
                    message: format!("bad membership record: '{}'", line),
                })?
                .to_string();
            let state: MemberState = parts
                .next()
                .ok_or_else(|| crate::error::Error::Malformed {
                    message: format!("bad membership record: '{}'", line),
                })?
                .parse()?;
            let incarnation: u64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| crate::error::Error::Malformed {
                    message: format!("bad membership record: '{}'", line),
                })?;
            let timestamp_millis: i64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| crate::error::Error::Malformed {
                    message: format!("bad membership record: '{}'", line),
                })?;
            let last_change =
                chrono::DateTime::from_timestamp_millis(timestamp_millis).unwrap_or_else(chrono::Utc::now);
            table.insert(Member { id: NodeId(id), address, state, incarnation, last_change });
        }
        Ok(table)
    }

    pub fn clear(&self) {
        self.members.write().clear();
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}
