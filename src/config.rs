//! Configuration bundle for a HyDFS node.
//!
//! Everything here is a plain, serializable value constructed once at
//! startup and passed into each subsystem — no hidden globals. Reading this
//! from a TOML file on disk, watching it for changes, and the
//! hostname-construction convention mapping a node id to a DNS name are
//! adapters outside the core (see `resolver::EndpointResolver`); this module
//! only owns parsing an already-read bundle into typed values and
//! validating it.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Default replica fan-out: a primary plus its `REP_NUM` ring successors.
pub const DEFAULT_REP_NUM: usize = 3;
/// The fixed key-space size files and nodes are hashed onto (`[1, 1000]`).
pub const RING_SIZE: u64 = 1000;

fn address_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[^\s:]+:\d{1,5}$").unwrap())
}

/// Top-level HyDFS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub failure_detector: FailureDetectorConfig,
    pub ports: PortConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            failure_detector: FailureDetectorConfig::default(),
            ports: PortConfig::default(),
            storage: StorageConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Config {
    /// Parse a TOML-formatted configuration bundle. Duration fields are
    /// written in human-readable form (e.g. `"500ms"`, `"2s"`) and parsed by
    /// the `duration_humantime` module below; everything else is plain TOML.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config {
            field: None,
            message: format!("failed to parse configuration: {}", e),
        })
    }

    /// Validate cross-field invariants the rest of the system relies on: a
    /// fixed cluster size, a replica count that fits inside it, and a
    /// well-formed introducer address.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cluster.expected_nodes == 0 {
            return Err(crate::error::Error::Config {
                field: Some("cluster.expected_nodes".to_string()),
                message: "cluster size must be at least 1".to_string(),
            });
        }
        if self.cluster.replica_count >= self.cluster.expected_nodes {
            return Err(crate::error::Error::Config {
                field: Some("cluster.replica_count".to_string()),
                message: format!(
                    "replica_count ({}) must be smaller than expected_nodes ({})",
                    self.cluster.replica_count, self.cluster.expected_nodes
                ),
            });
        }
        if !address_pattern().is_match(&self.failure_detector.introducer_address) {
            return Err(crate::error::Error::Config {
                field: Some("failure_detector.introducer_address".to_string()),
                message: format!(
                    "introducer_address '{}' is not host:port",
                    self.failure_detector.introducer_address
                ),
            });
        }
        Ok(())
    }
}

/// Cluster-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Fixed cluster size `N`; the MaintenanceLoop treats the cluster as
    /// unstable until exactly this many nodes are alive.
    pub expected_nodes: usize,
    /// `REP_NUM`: replicas per primary (successors in ring order).
    pub replica_count: usize,
    pub local_node_id: u32,
    pub local_address: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "hydfs-cluster".to_string(),
            expected_nodes: 10,
            replica_count: DEFAULT_REP_NUM,
            local_node_id: 1,
            local_address: "127.0.0.1:7000".to_string(),
        }
    }
}

/// SWIM failure-detector parameters (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetectorConfig {
    #[serde(with = "duration_humantime")]
    pub ping_timeout: Duration,
    #[serde(with = "duration_humantime")]
    pub reping_timeout: Duration,
    #[serde(with = "duration_humantime")]
    pub fd_period: Duration,
    #[serde(with = "duration_humantime")]
    pub suspicion_timeout: Duration,
    #[serde(with = "duration_humantime")]
    pub gossip_duration: Duration,
    /// `K`: indirect-probe fanout.
    pub indirect_fanout: usize,
    /// `G`: gossip fanout.
    pub gossip_fanout: usize,
    /// Suspicion mode on/off at startup; can be toggled at runtime via the
    /// Cmd channel.
    pub suspicion_mode: bool,
    pub introducer_address: String,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(500),
            reping_timeout: Duration::from_millis(500),
            fd_period: Duration::from_secs(2),
            suspicion_timeout: Duration::from_secs(3),
            gossip_duration: Duration::from_secs(1),
            indirect_fanout: 3,
            gossip_fanout: 3,
            suspicion_mode: false,
            introducer_address: "127.0.0.1:7001".to_string(),
        }
    }
}

/// The four control-plane ports plus the file RPC port, kept separate so
/// ping/reping/gossip/cmd never head-of-line block each other (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub ping_port: u16,
    pub reping_port: u16,
    pub gossip_port: u16,
    pub cmd_port: u16,
    pub rpc_port: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            ping_port: 7946,
            reping_port: 7947,
            gossip_port: 7948,
            cmd_port: 7949,
            rpc_port: 8080,
        }
    }
}

/// Local file storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory prefix HyDFS filenames are stored under, verbatim.
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { prefix: "./hydfs-store".to_string() }
    }
}

/// Ambient logging/metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
    #[serde(with = "duration_humantime")]
    pub maintenance_tick: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), maintenance_tick: Duration::from_secs(2) }
    }
}

/// `serde` (de)serialization helpers for human-readable durations
/// (`"500ms"`, `"2s"`).
mod duration_humantime {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        if d.as_millis() % 1000 == 0 {
            s.serialize_str(&format!("{}s", d.as_secs()))
        } else {
            s.serialize_str(&format!("{}ms", d.as_millis()))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<Duration, String> {
        let raw = raw.trim();
        if let Some(num) = raw.strip_suffix("ms") {
            return num.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| e.to_string());
        }
        if let Some(num) = raw.strip_suffix('s') {
            return num.trim().parse::<f64>().map(Duration::from_secs_f64).map_err(|e| e.to_string());
        }
        raw.parse::<u64>().map(Duration::from_millis).map_err(|e| e.to_string())
    }
}
