//! Client-facing coordinator: resolves a file's primary and runs the
//! two-phase authorize-then-upload sequence against it (§4.5).
//!
//! Any node can act as coordinator for any request; it is purely a
//! forwarding role driven by `placement::primary` over the current live
//! view.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::membership::table::MembershipTable;
use crate::placement;
use crate::resolver::EndpointResolver;
use crate::transport::rpc::{FileOp, RpcClient};
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// An outstanding authorization the primary has granted to a coordinator,
/// scoped to one `create`/`append` attempt. Presenting the token on the
/// follow-up upload is what lets the primary reject stray writes (§4.5's
/// `UnauthorizedUpload`).
#[derive(Debug, Clone)]
pub struct Reservation {
    pub token: String,
    pub name: String,
    pub op: FileOp,
    pub granted_at: Instant,
}

impl Reservation {
    fn new(name: &str, op: FileOp) -> Self {
        Self { token: Uuid::new_v4().to_string(), name: name.to_string(), op, granted_at: Instant::now() }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.granted_at.elapsed() > ttl
    }
}

/// Receives client requests and forwards them through the two-phase
/// protocol to each file's primary.
pub struct FileCoordinator {
    local_id: NodeId,
    config: Config,
    table: Arc<MembershipTable>,
    resolver: Arc<dyn EndpointResolver>,
    client: RpcClient,
    reservations: RwLock<HashMap<String, Reservation>>,
    reservation_ttl: Duration,
}

impl FileCoordinator {
    pub fn new(local_id: NodeId, config: Config, table: Arc<MembershipTable>, resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            local_id,
            config,
            table,
            resolver,
            client: RpcClient::new(),
            reservations: RwLock::new(HashMap::new()),
            reservation_ttl: Duration::from_secs(30),
        }
    }

    /// Resolve `name`'s primary, but only once the cluster is full. §4.7
    /// step 2 skips file I/O entirely until `|L| == expected_nodes`, so a
    /// request arriving during convergence gets `NotReady` rather than a
    /// placement computed over a partial view.
    fn primary_for(&self, name: &str) -> Result<(NodeId, std::net::SocketAddr)> {
        let live = self.table.alive_ids();
        if live.len() != self.config.cluster.expected_nodes {
            return Err(Error::NotReady {
                message: format!(
                    "cluster not yet full: {} of {} expected nodes alive",
                    live.len(),
                    self.config.cluster.expected_nodes
                ),
            });
        }
        let owner = placement::primary(placement::key(name), &live)
            .ok_or_else(|| Error::NotReady { message: "no live members to resolve a primary from".to_string() })?;
        let addr = self
            .resolver
            .resolve(owner)
            .ok_or_else(|| Error::NotReady { message: format!("no known address for primary {}", owner) })?;
        Ok((owner, addr))
    }

    /// Create a new file: authorize with the primary (rejects if the file
    /// already exists there), then stream the body.
    pub async fn create(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.two_phase(name, FileOp::Create, data).await
    }

    /// Append to an existing file: authorize with the primary (rejects if
    /// the file is not found there), then stream the body.
    pub async fn append(&self, name: &str, data: Vec<u8>) -> Result<()> {
        self.two_phase(name, FileOp::Append, data).await
    }

    async fn two_phase(&self, name: &str, op: FileOp, data: Vec<u8>) -> Result<()> {
        let (owner, addr) = self.primary_for(name)?;
        debug!(file = name, primary = %owner, ?op, "authorizing with primary");
        let token = self.client.authorize(addr, name, op).await?;
        let reservation = Reservation::new(name, op);
        self.reservations.write().insert(token.clone(), reservation);
        let result = self.client.upload(addr, name, &token, &data, op).await;
        self.reservations.write().remove(&token);
        result
    }

    /// Fetch a file's contents via its primary.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let (owner, addr) = self.primary_for(name)?;
        debug!(file = name, primary = %owner, "forwarding get to primary");
        self.client.fetch(addr, name).await
    }

    /// Forward a `list_store`-style request to every alive member and
    /// collect what each reports holding locally.
    pub async fn list_store(&self) -> Vec<(NodeId, Result<Vec<crate::types::StoredFile>>)> {
        let mut out = Vec::new();
        for id in self.table.alive_ids() {
            let Some(addr) = self.resolver.resolve(id) else { continue };
            let result = self.client.list_files(addr).await;
            out.push((id, result));
        }
        out
    }

    /// Drop reservations older than the TTL; called periodically by the
    /// maintenance loop so a crashed primary never leaks memory here.
    pub fn sweep_expired_reservations(&self) {
        let ttl = self.reservation_ttl;
        self.reservations.write().retain(|_, r| !r.is_expired(ttl));
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    #[test]
    fn reservation_expires_after_ttl() {
        let r = Reservation::new("a.txt", FileOp::Create);
        assert!(!r.is_expired(Duration::from_secs(30)));
        assert!(r.is_expired(Duration::from_secs(0)));
    }

    #[test]
    fn primary_for_with_empty_table_is_not_ready() {
        let table = Arc::new(MembershipTable::new());
        let coordinator =
            FileCoordinator::new(NodeId(1), Config::default(), table, Arc::new(StaticResolver::new()));
        let err = coordinator.primary_for("a.txt").unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }

    #[test]
    fn unresolvable_primary_is_not_ready() {
        let table = Arc::new(MembershipTable::new());
        table.insert(crate::types::Member::new(NodeId(1), "127.0.0.1:7000"));
        table.set_self_state(NodeId(1), crate::types::MemberState::Alive, 0);
        let coordinator =
            FileCoordinator::new(NodeId(1), Config::default(), table, Arc::new(StaticResolver::new()));
        let err = coordinator.primary_for("a.txt").unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }
}
