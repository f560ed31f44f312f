//! Core data types shared across HyDFS's subsystems: node identity,
//! membership records, and the stored-file model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A node's stable identifier in `[1, N]`. Doubles as both the address key
/// and the ring position indicator — see `placement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A member's failure-detector state. Ordering matches the `state_rank`
/// used by the newer-wins merge rule: `Alive < Suspected < Failed`. `Left`
/// is intentionally not `Ord`-comparable to the others in the merge rule
/// (it is only ever self-assigned, never contested).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Alive,
    Suspected,
    Failed,
    Left,
}

impl MemberState {
    /// Rank used by the membership table's newer-wins merge rule. `Left`
    /// ranks above `Failed` so a voluntary departure cannot be overridden
    /// by a stale `Failed` gossip at the same incarnation.
    pub fn rank(self) -> u8 {
        match self {
            MemberState::Alive => 0,
            MemberState::Suspected => 1,
            MemberState::Failed => 2,
            MemberState::Left => 3,
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberState::Alive => "ALIVE",
            MemberState::Suspected => "SUSPECTED",
            MemberState::Failed => "FAILED",
            MemberState::Left => "LEFT",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for MemberState {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALIVE" => Ok(MemberState::Alive),
            "SUSPECTED" => Ok(MemberState::Suspected),
            "FAILED" => Ok(MemberState::Failed),
            "LEFT" => Ok(MemberState::Left),
            other => Err(crate::error::Error::Malformed {
                message: format!("unknown member state '{}'", other),
            }),
        }
    }
}

/// A cluster member as tracked by the `MembershipTable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub address: String,
    pub state: MemberState,
    /// Monotonically non-decreasing counter owned by the member itself;
    /// only the owner may advance it.
    pub incarnation: u64,
    /// Local observation time of the most recent state change.
    pub last_change: chrono::DateTime<chrono::Utc>,
}

impl Member {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            state: MemberState::Alive,
            incarnation: 0,
            last_change: chrono::Utc::now(),
        }
    }

    /// The `(incarnation, state_rank)` pair the newer-wins merge rule
    /// compares lexicographically.
    pub fn merge_key(&self) -> (u64, u8) {
        (self.incarnation, self.state.rank())
    }
}

/// Which side of the primary/replica relationship a stored file plays on
/// this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileRole {
    Primary,
    Replica,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if *self == FileRole::Primary { "p" } else { "r" })
    }
}

impl std::str::FromStr for FileRole {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p" => Ok(FileRole::Primary),
            "r" => Ok(FileRole::Replica),
            other => Err(crate::error::Error::BadRequest {
                message: format!("invalid ftype '{}'", other),
            }),
        }
    }
}

/// A record in a node's local file index. The name is the sole key; the
/// actual bytes live on disk under the configured storage prefix.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub role: FileRole,
}
