//! Thin local-cluster demo wiring the core's adapters together: a
//! `StaticResolver` standing in for the hostname-construction convention,
//! and an in-process introducer instead of a config-file-driven one.
//!
//! Brings up a 3-node HyDFS cluster on loopback, joins node 2 and node 3
//! through node 1, waits for membership to converge, then exercises
//! `create`/`append`/`get` through whichever node happens to coordinate.

use hydfs_core::config::{ClusterConfig, Config, PortConfig};
use hydfs_core::node::HyDfsNode;
use hydfs_core::resolver::StaticResolver;
use hydfs_core::types::NodeId;
use std::sync::Arc;
use std::time::Duration;

fn node_config(id: u32, base_port: u16, storage: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.cluster = ClusterConfig {
        name: "demo-cluster".to_string(),
        expected_nodes: 3,
        replica_count: 2,
        local_node_id: id,
        local_address: format!("127.0.0.1:{}", base_port),
    };
    config.ports = PortConfig {
        ping_port: base_port + 1,
        reping_port: base_port + 2,
        gossip_port: base_port + 3,
        cmd_port: base_port + 4,
        rpc_port: base_port + 5,
    };
    config.storage.prefix = storage.join(format!("node-{id}")).to_string_lossy().to_string();
    config.failure_detector.introducer_address = "127.0.0.1:7000".to_string();
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("hydfs_core=info").init();

    let storage = std::env::temp_dir().join(format!("hydfs-demo-{}", std::process::id()));

    let mut resolver = StaticResolver::new();
    for (id, base_port) in [(1u32, 7000u16), (2, 7100), (3, 7200)] {
        resolver.insert(NodeId(id), format!("127.0.0.1:{}", base_port).parse()?);
    }
    let resolver = Arc::new(resolver);

    let node1 = HyDfsNode::start(node_config(1, 7000, &storage), resolver.clone()).await?;
    let node2 = HyDfsNode::start(node_config(2, 7100, &storage), resolver.clone()).await?;
    let node3 = HyDfsNode::start(node_config(3, 7200, &storage), resolver.clone()).await?;

    node2.join("127.0.0.1:7000".parse()?).await?;
    node3.join("127.0.0.1:7000".parse()?).await?;

    // Give the detector a couple of cycles to gossip the joins around
    // before treating the cluster as stable.
    tokio::time::sleep(Duration::from_secs(3)).await;

    node1.coordinator.create("greeting.txt", b"hello".to_vec()).await?;
    node1.coordinator.append("greeting.txt", b", world".to_vec()).await?;
    let body = node1.coordinator.get("greeting.txt").await?;
    println!("greeting.txt = {:?}", String::from_utf8_lossy(&body));

    node1.shutdown();
    node2.shutdown();
    node3.shutdown();
    std::fs::remove_dir_all(&storage).ok();
    Ok(())
}
