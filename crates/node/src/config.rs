//! Node configuration

use std::path::PathBuf;
use std::time::Duration;

use cachegrid_store::StoreConfig;

/// Everything a storage node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Node identity; names the WAL and snapshot files
    pub node_id: String,
    /// Root of the persisted state layout
    pub data_dir: PathBuf,
    /// Whether mutations are logged and snapshots taken
    pub persistence: bool,
    /// Cadence of the periodic snapshotter
    pub snapshot_interval: Duration,
    /// Snapshot files retained per node
    pub keep_snapshots: usize,
    /// Store sizing and eviction settings
    pub store: StoreConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 7000,
            node_id: "node1".to_string(),
            data_dir: PathBuf::from("./data"),
            persistence: true,
            snapshot_interval: Duration::from_secs(180),
            keep_snapshots: 3,
            store: StoreConfig::default(),
        }
    }
}

impl NodeConfig {
    /// `host:port` the node listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
