//! Reacts to membership changes: recomputes cached ring views, decides
//! whether the cluster is currently "stable" (all `N` expected nodes
//! alive), and sweeps expired coordinator reservations (§4.7).

use crate::config::Config;
use crate::coordinator::FileCoordinator;
use crate::membership::table::MembershipTable;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Periodically recomputes the live ring view and derived state, and
/// performs light janitorial work. A stable cluster is exactly `N` alive
/// members; anything else holds placement decisions in a degraded state
/// (callers still get an answer from `placement`, but the loop logs the
/// instability so operators notice).
pub struct MaintenanceLoop {
    config: Config,
    table: Arc<MembershipTable>,
    coordinator: Arc<FileCoordinator>,
    cached_view: RwLock<Vec<NodeId>>,
    stable: AtomicBool,
    shutdown: Arc<Notify>,
}

impl MaintenanceLoop {
    pub fn new(config: Config, table: Arc<MembershipTable>, coordinator: Arc<FileCoordinator>) -> Self {
        Self {
            config,
            table,
            coordinator,
            cached_view: RwLock::new(Vec::new()),
            stable: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    pub fn is_stable(&self) -> bool {
        self.stable.load(Ordering::Relaxed)
    }

    pub fn cached_view(&self) -> Vec<NodeId> {
        self.cached_view.read().clone()
    }

    fn tick(&self) {
        let view = self.table.alive_ids();
        let stable = view.len() == self.config.cluster.expected_nodes;
        let was_stable = self.stable.swap(stable, Ordering::Relaxed);
        if stable != was_stable {
            info!(alive = view.len(), expected = self.config.cluster.expected_nodes, stable, "cluster stability changed");
        }
        *self.cached_view.write() = view;
        self.coordinator.sweep_expired_reservations();
        debug!("maintenance tick complete");
    }

    /// Run the periodic tick until shutdown is signaled.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.monitoring.maintenance_tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = self.shutdown.notified() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::types::{Member, MemberState};

    fn setup(expected_nodes: usize) -> (MaintenanceLoop, Arc<MembershipTable>) {
        let mut config = Config::default();
        config.cluster.expected_nodes = expected_nodes;
        let table = Arc::new(MembershipTable::new());
        let coordinator =
            Arc::new(FileCoordinator::new(NodeId(1), config.clone(), table.clone(), Arc::new(StaticResolver::new())));
        (MaintenanceLoop::new(config, table.clone(), coordinator), table)
    }

    #[test]
    fn unstable_below_expected_count() {
        let (loop_, table) = setup(3);
        table.insert(Member::new(NodeId(1), "a"));
        table.set_self_state(NodeId(1), MemberState::Alive, 0);
        loop_.tick();
        assert!(!loop_.is_stable());
    }

    #[test]
    fn stable_at_expected_count() {
        let (loop_, table) = setup(2);
        for id in [1u32, 2] {
            table.insert(Member::new(NodeId(id), "a"));
            table.set_self_state(NodeId(id), MemberState::Alive, 0);
        }
        loop_.tick();
        assert!(loop_.is_stable());
        assert_eq!(loop_.cached_view().len(), 2);
    }
}
