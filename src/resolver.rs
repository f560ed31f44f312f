//! The `{node_id -> endpoint}` resolver seam.
//!
//! The hostname-construction convention (how a node id maps to a DNS name in
//! a real deployment) is an adapter outside this crate; the core only needs
//! something implementing `EndpointResolver`. `StaticResolver` is the
//! in-process adapter used by the demo binary and the test suite.

use crate::types::NodeId;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Resolves a node id to the address it should be reached at.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, id: NodeId) -> Option<SocketAddr>;
}

/// A resolver backed by a fixed, pre-populated map — suitable for a static
/// 10-node cluster whose addresses are known at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    addresses: HashMap<NodeId, SocketAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self { addresses: HashMap::new() }
    }

    pub fn with(mut self, id: NodeId, addr: SocketAddr) -> Self {
        self.addresses.insert(id, addr);
        self
    }

    pub fn insert(&mut self, id: NodeId, addr: SocketAddr) {
        self.addresses.insert(id, addr);
    }
}

impl EndpointResolver for StaticResolver {
    fn resolve(&self, id: NodeId) -> Option<SocketAddr> {
        self.addresses.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_node() {
        let resolver = StaticResolver::new().with(NodeId(1), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(resolver.resolve(NodeId(1)), Some("127.0.0.1:9000".parse().unwrap()));
    }

    #[test]
    fn unknown_node_resolves_to_none() {
        let resolver = StaticResolver::new();
        assert_eq!(resolver.resolve(NodeId(99)), None);
    }
}
