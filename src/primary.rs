//! The primary-side execution engine: serves `create`/`append`/`get`
//! for files this node is primary (or replica) for, and fans out writes to
//! the current successor chain (§4.6).

use crate::config::Config;
use crate::error::{Error, Result};
use crate::membership::table::MembershipTable;
use crate::placement;
use crate::resolver::EndpointResolver;
use crate::transport::rpc::RpcClient;
use crate::types::{FileRole, NodeId, StoredFile};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Serves file operations for whatever files this node currently holds,
/// whether as primary or as a replica.
pub struct PrimaryEngine {
    local_id: NodeId,
    config: Config,
    table: Arc<MembershipTable>,
    resolver: Arc<dyn EndpointResolver>,
    client: RpcClient,
    /// Local index of files held on this node, name -> role. The bytes
    /// themselves live on disk under `config.storage.prefix`.
    index: RwLock<HashMap<String, StoredFile>>,
}

impl PrimaryEngine {
    pub fn new(
        local_id: NodeId,
        config: Config,
        table: Arc<MembershipTable>,
        resolver: Arc<dyn EndpointResolver>,
    ) -> Self {
        Self { local_id, config, table, resolver, client: RpcClient::new(), index: RwLock::new(HashMap::new()) }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        PathBuf::from(&self.config.storage.prefix).join(name)
    }

    /// Whether this node currently holds a local copy of `name`, in any
    /// role.
    pub fn existfile(&self, name: &str) -> bool {
        self.index.read().contains_key(name)
    }

    pub fn role_of(&self, name: &str) -> Option<FileRole> {
        self.index.read().get(name).map(|f| f.role)
    }

    /// The current live ring view, used to compute the successor chain for
    /// fan-out.
    fn live_view(&self) -> Vec<NodeId> {
        self.table.alive_ids()
    }

    /// Replica targets for `name`'s primary (this node), recomputed fresh on
    /// every call from the live view — the `MaintenanceLoop` keeps this
    /// cheap by keeping the view small and the table non-blocking.
    fn successors(&self) -> Vec<NodeId> {
        placement::successors(self.local_id, &self.live_view(), self.config.cluster.replica_count)
    }

    /// Create a brand-new file locally as primary, then fan out to
    /// successors. Fails with `AlreadyExists` if the file is already held
    /// locally.
    pub async fn creating(&self, name: &str, data: Vec<u8>) -> Result<()> {
        if self.existfile(name) {
            return Err(Error::AlreadyExists { name: name.to_string() });
        }
        self.write_local(name, &data, FileRole::Primary).await?;
        self.fan_out(name, &data, false).await;
        info!(file = name, bytes = data.len(), "created file as primary");
        Ok(())
    }

    /// Append to a file this node holds (primary or replica); appends
    /// locally, and if primary, fans the append out to successors.
    pub async fn appending(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let role = self.role_of(name).ok_or_else(|| Error::NotFound { name: name.to_string() })?;
        self.append_local(name, &data).await?;
        if role == FileRole::Primary {
            self.fan_out(name, &data, true).await;
        }
        debug!(file = name, bytes = data.len(), "appended to file");
        Ok(())
    }

    /// Read the full contents of a file held locally.
    pub async fn getting(&self, name: &str) -> Result<Vec<u8>> {
        if !self.existfile(name) {
            return Err(Error::NotFound { name: name.to_string() });
        }
        let mut file = tokio::fs::File::open(self.path_for(name)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Accept a replicated write from a primary: store locally as a
    /// replica, creating the record if it does not yet exist.
    pub async fn receive_replica_write(&self, name: &str, data: &[u8], is_append: bool) -> Result<()> {
        if is_append && self.existfile(name) {
            self.append_local(name, data).await?;
        } else {
            self.write_local(name, data, FileRole::Replica).await?;
        }
        Ok(())
    }

    async fn write_local(&self, name: &str, data: &[u8], role: FileRole) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.storage.prefix).await?;
        let mut file = tokio::fs::File::create(self.path_for(name)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        self.index.write().insert(name.to_string(), StoredFile { name: name.to_string(), role });
        Ok(())
    }

    async fn append_local(&self, name: &str, data: &[u8]) -> Result<()> {
        use tokio::fs::OpenOptions;
        let mut file = OpenOptions::new().append(true).open(self.path_for(name)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Best-effort sequential fan-out to the current successor chain;
    /// a successor that is unreachable is logged and skipped, matching the
    /// "strong consistency across replicas" Non-goal — no quorum wait here.
    async fn fan_out(&self, name: &str, data: &[u8], is_append: bool) {
        for successor in self.successors() {
            let Some(addr) = self.resolver.resolve(successor) else {
                warn!(node = %successor, "no known address for replica fan-out target, skipping");
                continue;
            };
            if let Err(e) = self.client.replicate(addr, name, data, is_append).await {
                warn!(node = %successor, error = %e, "replica fan-out failed");
            }
        }
    }

    pub fn list_local(&self) -> Vec<StoredFile> {
        self.index.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::types::MemberState;

    fn test_engine(tmp: &std::path::Path) -> PrimaryEngine {
        let mut config = Config::default();
        config.storage.prefix = tmp.to_string_lossy().to_string();
        config.cluster.replica_count = 0;
        let table = Arc::new(MembershipTable::new());
        table.insert(crate::types::Member::new(NodeId(1), "127.0.0.1:7000"));
        table.set_self_state(NodeId(1), MemberState::Alive, 0);
        PrimaryEngine::new(NodeId(1), config, table, Arc::new(StaticResolver::new()))
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempdir();
        let engine = test_engine(dir.path());
        engine.creating("a.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(engine.getting("a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn create_twice_fails_with_already_exists() {
        let dir = tempdir();
        let engine = test_engine(dir.path());
        engine.creating("a.txt", b"hello".to_vec()).await.unwrap();
        let err = engine.creating("a.txt", b"again".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn append_accumulates_in_order() {
        let dir = tempdir();
        let engine = test_engine(dir.path());
        engine.creating("log.txt", b"a".to_vec()).await.unwrap();
        engine.appending("log.txt", b"b".to_vec()).await.unwrap();
        engine.appending("log.txt", b"c".to_vec()).await.unwrap();
        assert_eq!(engine.getting("log.txt").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn get_missing_file_is_not_found() {
        let dir = tempdir();
        let engine = test_engine(dir.path());
        let err = engine.getting("missing.txt").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn append_missing_file_is_not_found() {
        let dir = tempdir();
        let engine = test_engine(dir.path());
        let err = engine.appending("missing.txt", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal scoped temp directory so tests don't depend on an external
    /// `tempfile` crate the rest of the workspace has no other use for.
    struct TempDir(PathBuf);
    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("hydfs-test-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }
        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }
    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
