//! Top-level assembly: wires `Transport`, `MembershipTable`,
//! `FailureDetector`, `FileCoordinator`, `PrimaryEngine` and
//! `MaintenanceLoop` into one running node (§4), in the same spirit as a
//! coordinator crate's root assembly type.

use crate::config::Config;
use crate::coordinator::FileCoordinator;
use crate::error::Result;
use crate::maintenance::MaintenanceLoop;
use crate::membership::detector::FailureDetector;
use crate::membership::table::MembershipTable;
use crate::membership::wire::JoinOutcome;
use crate::primary::PrimaryEngine;
use crate::resolver::EndpointResolver;
use crate::transport::control::ControlChannel;
use crate::transport::rpc::RpcServer;
use crate::types::{Member, MemberState, NodeId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A fully assembled, running HyDFS node.
pub struct HyDfsNode {
    pub local_id: NodeId,
    pub config: Config,
    pub table: Arc<MembershipTable>,
    pub detector: Arc<FailureDetector>,
    pub coordinator: Arc<FileCoordinator>,
    pub primary: Arc<PrimaryEngine>,
    pub maintenance: Arc<MaintenanceLoop>,
    rpc_server: RpcServer,
    background: Vec<JoinHandle<()>>,
}

impl HyDfsNode {
    /// Bind all sockets, assemble every subsystem, and spawn the detector's
    /// serve loop, the maintenance tick, and the file RPC server. The node
    /// seeds itself into its own membership table as `Alive` before
    /// anything else runs — a node always trusts its own liveness.
    pub async fn start(config: Config, resolver: Arc<dyn EndpointResolver>) -> Result<Self> {
        config.validate()?;
        let local_id = NodeId(config.cluster.local_node_id);
        let bind_ip = local_bind_ip(&config.cluster.local_address);

        let table = Arc::new(MembershipTable::new());
        table.insert(Member::new(local_id, config.cluster.local_address.clone()));
        table.set_self_state(local_id, MemberState::Alive, 0);

        let channel = Arc::new(ControlChannel::bind(&bind_ip, &config.ports).await?);
        let detector =
            Arc::new(FailureDetector::new(local_id, config.clone(), table.clone(), resolver.clone(), channel));

        let coordinator =
            Arc::new(FileCoordinator::new(local_id, config.clone(), table.clone(), resolver.clone()));
        let primary = Arc::new(PrimaryEngine::new(local_id, config.clone(), table.clone(), resolver));
        let maintenance = Arc::new(MaintenanceLoop::new(config.clone(), table.clone(), coordinator.clone()));

        let rpc_addr: SocketAddr =
            format!("{}:{}", bind_ip, config.ports.rpc_port).parse().map_err(|e| crate::error::Error::Config {
                field: Some("ports.rpc_port".to_string()),
                message: format!("invalid RPC bind address: {}", e),
            })?;
        let rpc_server = RpcServer::serve(rpc_addr, primary.clone()).await;

        let mut background = Vec::new();
        background.push({
            let detector = detector.clone();
            tokio::spawn(async move { detector.serve().await })
        });
        background.push({
            let maintenance = maintenance.clone();
            tokio::spawn(async move { maintenance.run().await })
        });
        background.push({
            let detector = detector.clone();
            let period = detector_period(&config);
            tokio::spawn(async move { run_detection_cycles(detector, period).await })
        });

        info!(node = %local_id, address = %config.cluster.local_address, "hydfs node started");
        Ok(Self { local_id, config, table, detector, coordinator, primary, maintenance, rpc_server, background })
    }

    /// Join the cluster through `introducer`, merging the returned table
    /// into this node's own view, or propagating the rejection reason.
    pub async fn join(&self, introducer: SocketAddr) -> Result<()> {
        match self.detector.join(introducer, &self.config.cluster.local_address).await? {
            JoinOutcome::Approved(table) => {
                for member in table.all() {
                    self.table.update(member);
                }
                self.detector.announce_self().await;
                Ok(())
            }
            JoinOutcome::Rejected(reason) => {
                Err(crate::error::Error::Membership { message: format!("join rejected: {}", reason) })
            }
        }
    }

    /// Stop all background tasks and the RPC listener. Safe to call once.
    pub fn shutdown(&self) {
        self.detector.shutdown_handle().notify_one();
        self.maintenance.shutdown_handle().notify_one();
        self.rpc_server.shutdown();
        for task in &self.background {
            task.abort();
        }
    }
}

impl Drop for HyDfsNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn local_bind_ip(address: &str) -> String {
    address.rsplit_once(':').map(|(host, _)| host.to_string()).unwrap_or_else(|| "0.0.0.0".to_string())
}

fn detector_period(config: &Config) -> std::time::Duration {
    config.failure_detector.fd_period
}

async fn run_detection_cycles(detector: Arc<FailureDetector>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = detector.run_cycle().await {
            tracing::debug!(error = %e, "detection cycle failed");
        }
        detector.run_suspicion_sweep().await;
    }
}
