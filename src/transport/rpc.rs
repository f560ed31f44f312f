//! File RPC surface: coordinator -> primary authorize/upload/get, and
//! primary -> replica fan-out, implemented with `warp` on the server side
//! and `reqwest` for outbound calls (§6).

use crate::error::{Error, Result};
use crate::primary::PrimaryEngine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};
use warp::Filter;

/// Tokens this node's primary side has granted via `authorize` but not yet
/// consumed by a matching `upload` — the server-side half of the two-phase
/// protocol's Reservation (§3, §7's `UnauthorizedUpload`). Keyed by
/// filename; a filename can have at most one outstanding grant at a time.
type PendingAuthorizations = Arc<RwLock<HashMap<String, String>>>;

/// Which two-phase operation a reservation was granted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileOp {
    Create,
    Append,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthorizeRequest {
    op: FileOp,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthorizeResponse {
    token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Runs the file RPC HTTP server for one node, dispatching straight to its
/// `PrimaryEngine`. The coordinator-side authorize/upload/fetch calls are
/// plain pass-throughs to the primary handling the request; this server
/// does not itself resolve placement.
pub struct RpcServer {
    shutdown: Arc<Notify>,
}

impl RpcServer {
    /// Bind and serve on `addr` until `shutdown` is triggered. Returns once
    /// the listener has stopped accepting connections.
    pub async fn serve(addr: SocketAddr, primary: Arc<PrimaryEngine>) -> Self {
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = shutdown.clone();
        let pending: PendingAuthorizations = Arc::new(RwLock::new(HashMap::new()));

        let primary_filter = warp::any().map(move || primary.clone());
        let pending_filter = warp::any().map(move || pending.clone());

        let authorize = warp::path("internal")
            .and(warp::path("authorize"))
            .and(warp::path::param::<String>())
            .and(warp::post())
            .and(warp::body::json())
            .and(primary_filter.clone())
            .and(pending_filter.clone())
            .and_then(handle_authorize);

        let upload = warp::path("internal")
            .and(warp::path("upload"))
            .and(warp::path::param::<String>())
            .and(warp::query::<UploadQuery>())
            .and(warp::put())
            .and(warp::body::bytes())
            .and(primary_filter.clone())
            .and(pending_filter)
            .and_then(handle_upload);

        let replicate = warp::path("internal")
            .and(warp::path("replicate"))
            .and(warp::path::param::<String>())
            .and(warp::query::<ReplicateQuery>())
            .and(warp::put())
            .and(warp::body::bytes())
            .and(primary_filter.clone())
            .and_then(handle_replicate);

        let fetch = warp::path("internal")
            .and(warp::path("file"))
            .and(warp::path::param::<String>())
            .and(warp::get())
            .and(primary_filter.clone())
            .and_then(handle_fetch);

        let list = warp::path("internal")
            .and(warp::path("files"))
            .and(warp::get())
            .and(primary_filter)
            .and_then(handle_list);

        let routes = authorize.or(upload).or(replicate).or(fetch).or(list).with(warp::log("hydfs::rpc"));

        let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
            shutdown_signal.notified().await;
        });
        info!(%addr, "file RPC server listening");
        tokio::spawn(server);
        Self { shutdown }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ReplicateQuery {
    append: bool,
}

async fn handle_authorize(
    name: String,
    request: AuthorizeRequest,
    primary: Arc<PrimaryEngine>,
    pending: PendingAuthorizations,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let outcome = match request.op {
        FileOp::Create if primary.existfile(&name) => Err(Error::AlreadyExists { name: name.clone() }),
        FileOp::Append if !primary.existfile(&name) => Err(Error::NotFound { name: name.clone() }),
        _ => Ok(()),
    };
    match outcome {
        Ok(()) => {
            let token = uuid::Uuid::new_v4().to_string();
            pending.write().insert(name, token.clone());
            Ok(warp::reply::json(&AuthorizeResponse { token }))
        }
        Err(e) => {
            error!(file = %name, error = %e, "authorize rejected");
            Ok(warp::reply::json(&ErrorBody { message: e.to_string() }))
        }
    }
}

async fn handle_upload(
    name: String,
    query: UploadQuery,
    body: bytes::Bytes,
    primary: Arc<PrimaryEngine>,
    pending: PendingAuthorizations,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    // The token must match the one just handed out by `handle_authorize`
    // for this exact filename; a PUT with no matching grant is rejected as
    // UnauthorizedUpload regardless of body contents (§7, §8).
    let authorized = pending.write().remove(&name).is_some_and(|granted| granted == query.token);
    if !authorized {
        return Ok(warp::reply::with_status(
            "upload has no matching authorization",
            warp::http::StatusCode::UNAUTHORIZED,
        ));
    }
    let data = body.to_vec();
    let result = if primary.existfile(&name) {
        primary.appending(&name, data).await
    } else {
        primary.creating(&name, data).await
    };
    match result {
        Ok(()) => Ok(warp::reply::with_status("ok", warp::http::StatusCode::OK)),
        Err(_) => Ok(warp::reply::with_status("rejected", warp::http::StatusCode::CONFLICT)),
    }
}

async fn handle_replicate(
    name: String,
    query: ReplicateQuery,
    body: bytes::Bytes,
    primary: Arc<PrimaryEngine>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    match primary.receive_replica_write(&name, &body, query.append).await {
        Ok(()) => Ok(warp::reply::with_status("ok", warp::http::StatusCode::OK)),
        Err(_) => Ok(warp::reply::with_status("error", warp::http::StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

async fn handle_fetch(
    name: String,
    primary: Arc<PrimaryEngine>,
) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    match primary.getting(&name).await {
        Ok(data) => Ok(warp::reply::with_status(data, warp::http::StatusCode::OK)),
        Err(_) => Ok(warp::reply::with_status(Vec::new(), warp::http::StatusCode::NOT_FOUND)),
    }
}

async fn handle_list(primary: Arc<PrimaryEngine>) -> std::result::Result<impl warp::Reply, warp::Rejection> {
    let names: Vec<(String, String)> =
        primary.list_local().into_iter().map(|f| (f.name, f.role.to_string())).collect();
    Ok(warp::reply::json(&names))
}

/// Outbound HTTP client used by `FileCoordinator` (coordinator -> primary)
/// and `PrimaryEngine` (primary -> replica fan-out).
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    pub async fn authorize(&self, addr: SocketAddr, name: &str, op: FileOp) -> Result<String> {
        let url = format!("http://{}/internal/authorize/{}", addr, name);
        let response = self
            .http
            .post(&url)
            .json(&AuthorizeRequest { op })
            .send()
            .await
            .map_err(|e| Error::Unreachable { peer: addr.to_string(), message: e.to_string() })?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Malformed { message: format!("malformed authorize response: {}", e) })?;
        if let Some(token) = body.get("token").and_then(|v| v.as_str()) {
            return Ok(token.to_string());
        }
        let message = body.get("message").and_then(|v| v.as_str()).unwrap_or("authorize rejected").to_string();
        Err(classify_rejection(&message, name))
    }

    pub async fn upload(&self, addr: SocketAddr, name: &str, token: &str, data: &[u8], op: FileOp) -> Result<()> {
        let url = format!("http://{}/internal/upload/{}?token={}", addr, name, token);
        let response = self
            .http
            .put(&url)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Error::Unreachable { peer: addr.to_string(), message: e.to_string() })?;
        if response.status().is_success() {
            Ok(())
        } else if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            Err(Error::UnauthorizedUpload { name: name.to_string() })
        } else if op == FileOp::Create {
            Err(Error::AlreadyExists { name: name.to_string() })
        } else {
            Err(Error::NotFound { name: name.to_string() })
        }
    }

    pub async fn replicate(&self, addr: SocketAddr, name: &str, data: &[u8], append: bool) -> Result<()> {
        let url = format!("http://{}/internal/replicate/{}?append={}", addr, name, append);
        let response = self
            .http
            .put(&url)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Error::Unreachable { peer: addr.to_string(), message: e.to_string() })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Unreachable { peer: addr.to_string(), message: "replicate rejected".to_string() })
        }
    }

    pub async fn fetch(&self, addr: SocketAddr, name: &str) -> Result<Vec<u8>> {
        let url = format!("http://{}/internal/file/{}", addr, name);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unreachable { peer: addr.to_string(), message: e.to_string() })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound { name: name.to_string() });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::Malformed { message: format!("malformed file body: {}", e) })
    }

    pub async fn list_files(&self, addr: SocketAddr) -> Result<Vec<crate::types::StoredFile>> {
        let url = format!("http://{}/internal/files", addr);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unreachable { peer: addr.to_string(), message: e.to_string() })?;
        let raw: Vec<(String, String)> = response
            .json()
            .await
            .map_err(|e| Error::Malformed { message: format!("malformed file list: {}", e) })?;
        raw.into_iter()
            .map(|(name, role)| {
                Ok(crate::types::StoredFile { name, role: role.parse()? })
            })
            .collect()
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_rejection(message: &str, name: &str) -> Error {
    if message.contains("already exists") {
        Error::AlreadyExists { name: name.to_string() }
    } else if message.contains("not found") {
        Error::NotFound { name: name.to_string() }
    } else {
        Error::BadRequest { message: message.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::membership::table::MembershipTable;
    use crate::resolver::StaticResolver;
    use crate::types::{Member, MemberState, NodeId};

    async fn server_on(port: u16, storage: &std::path::Path) -> (RpcServer, SocketAddr) {
        let mut config = Config::default();
        config.storage.prefix = storage.to_string_lossy().to_string();
        config.cluster.replica_count = 0;
        let table = Arc::new(MembershipTable::new());
        table.insert(Member::new(NodeId(1), "127.0.0.1:7000"));
        table.set_self_state(NodeId(1), MemberState::Alive, 0);
        let primary = Arc::new(PrimaryEngine::new(NodeId(1), config, table, Arc::new(StaticResolver::new())));
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        (RpcServer::serve(addr, primary).await, addr)
    }

    #[tokio::test]
    async fn authorize_then_upload_round_trips() {
        let dir = std::env::temp_dir().join(format!("hydfs-rpc-test-{}", uuid::Uuid::new_v4()));
        let (server, addr) = server_on(19001, &dir).await;
        let client = RpcClient::new();

        let token = client.authorize(addr, "a.txt", FileOp::Create).await.unwrap();
        client.upload(addr, "a.txt", &token, b"hello", FileOp::Create).await.unwrap();
        let fetched = client.fetch(addr, "a.txt").await.unwrap();
        assert_eq!(fetched, b"hello");

        server.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn upload_without_authorize_is_rejected() {
        let dir = std::env::temp_dir().join(format!("hydfs-rpc-test-{}", uuid::Uuid::new_v4()));
        let (server, addr) = server_on(19002, &dir).await;
        let client = RpcClient::new();

        let err = client.upload(addr, "a.txt", "not-a-real-token", b"hello", FileOp::Create).await.unwrap_err();
        assert!(matches!(err, Error::UnauthorizedUpload { .. }));

        server.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn upload_token_is_single_use() {
        let dir = std::env::temp_dir().join(format!("hydfs-rpc-test-{}", uuid::Uuid::new_v4()));
        let (server, addr) = server_on(19003, &dir).await;
        let client = RpcClient::new();

        let token = client.authorize(addr, "a.txt", FileOp::Create).await.unwrap();
        client.upload(addr, "a.txt", &token, b"hello", FileOp::Create).await.unwrap();
        let err = client.upload(addr, "a.txt", &token, b"again", FileOp::Create).await.unwrap_err();
        assert!(matches!(err, Error::UnauthorizedUpload { .. }));

        server.shutdown();
        std::fs::remove_dir_all(&dir).ok();
    }
}
