//! Persisted state layout
//!
//! ```text
//! <data-dir>/
//!   wal/<nodeId>.wal              append-only, length-prefixed records
//!   snapshots/<nodeId>_<ts>.snap  versioned full dumps
//! ```

use std::path::{Path, PathBuf};

/// WAL directory under a data dir.
pub fn wal_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("wal")
}

/// WAL file for a node.
pub fn wal_path(data_dir: &Path, node_id: &str) -> PathBuf {
    wal_dir(data_dir).join(format!("{node_id}.wal"))
}

/// Snapshot directory under a data dir.
pub fn snapshots_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("snapshots")
}
