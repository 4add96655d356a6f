//! Crash-safe snapshot files
//!
//! A snapshot is a self-contained dump of the keyspace plus the WAL
//! sequence watermark it captures. Creation follows the
//! write → fsync → atomic-rename → fsync-dir pattern, so a crash at any
//! point leaves either the complete snapshot or no snapshot, never a
//! partial one.
//!
//! # File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ Magic "CGSN" (4) │ Format version (4 LE)      │
//! ├───────────────────────────────────────────────┤
//! │ Watermark seq (8) │ Created-at ms (8)         │
//! ├───────────────────────────────────────────────┤
//! │ Entry count (8) │ Node id (u16 len + bytes)   │
//! ├───────────────────────────────────────────────┤
//! │ Entries blob (u64 len + bincode)              │
//! ├───────────────────────────────────────────────┤
//! │ CRC32 over everything above (4 LE)            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Files are named `<nodeId>_<ts>.snap` with a zero-padded millisecond
//! timestamp, so lexicographic order on the suffix is creation order.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use cachegrid_core::entry::epoch_ms;
use cachegrid_core::{Entry, Error, Result, Value};

/// Magic bytes identifying a snapshot file.
const SNAPSHOT_MAGIC: [u8; 4] = *b"CGSN";

/// Current snapshot format version.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Key bytes
    pub key: Vec<u8>,
    /// Stored value
    pub value: Value,
    /// Creation time (epoch millis)
    pub created_at_ms: u64,
    /// Absolute expiration, if any
    pub expires_at_ms: Option<u64>,
    /// Last access time, carried so eviction stays fair after restart
    pub last_access_ms: u64,
    /// Access count, carried for the same reason
    pub access_count: u64,
}

impl SnapshotEntry {
    /// Capture a live entry.
    pub fn capture(key: Vec<u8>, entry: &Entry) -> Self {
        SnapshotEntry {
            key,
            value: entry.value.clone(),
            created_at_ms: entry.created_at_ms,
            expires_at_ms: entry.expires_at_ms,
            last_access_ms: entry.last_access_ms(),
            access_count: entry.access_count(),
        }
    }

    /// Rebuild the in-memory entry.
    pub fn into_entry(self) -> (Vec<u8>, Entry) {
        let entry = Entry::restore(
            self.value,
            self.created_at_ms,
            self.expires_at_ms,
            self.last_access_ms,
            self.access_count,
        );
        (self.key, entry)
    }
}

/// Metadata of a snapshot that was just written.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    /// Final file path
    pub path: PathBuf,
    /// WAL watermark the snapshot captures
    pub watermark: u64,
    /// Creation timestamp (epoch millis, also the filename suffix)
    pub created_at_ms: u64,
    /// Number of entries persisted
    pub entries: usize,
}

/// A snapshot read back from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    /// WAL watermark; replay starts strictly after this
    pub watermark: u64,
    /// Creation timestamp
    pub created_at_ms: u64,
    /// Persisted entries
    pub entries: Vec<SnapshotEntry>,
}

/// Snapshot directory manager for one node: writing, loading, retention.
pub struct SnapshotStore {
    dir: PathBuf,
    node_id: String,
    keep: usize,
}

impl SnapshotStore {
    /// Open (creating if needed) the snapshot directory for a node.
    ///
    /// `keep` is the number of snapshot files retained after each
    /// successful write; older files are pruned.
    pub fn new(dir: PathBuf, node_id: &str, keep: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(SnapshotStore {
            dir,
            node_id: node_id.to_string(),
            keep: keep.max(1),
        })
    }

    /// Snapshot directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot, crash-safely, and prune old files.
    pub fn write(&self, watermark: u64, entries: &[SnapshotEntry]) -> Result<SnapshotInfo> {
        let mut created_at_ms = epoch_ms();
        let blob = bincode::serialize(entries)?;

        // A snapshot per millisecond is the natural pace limit; bump the
        // suffix if a file for this instant already exists.
        let (final_path, tmp_path) = loop {
            let final_path = self.snapshot_path(created_at_ms);
            if !final_path.exists() {
                let tmp = self
                    .dir
                    .join(format!(".{}_{:016}.snap.tmp", self.node_id, created_at_ms));
                break (final_path, tmp);
            }
            created_at_ms += 1;
        };

        let mut header = Vec::with_capacity(64);
        header.extend_from_slice(&SNAPSHOT_MAGIC);
        header.extend_from_slice(&SNAPSHOT_FORMAT_VERSION.to_le_bytes());
        header.extend_from_slice(&watermark.to_le_bytes());
        header.extend_from_slice(&created_at_ms.to_le_bytes());
        header.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        header.extend_from_slice(&(self.node_id.len() as u16).to_le_bytes());
        header.extend_from_slice(self.node_id.as_bytes());

        let mut hasher = Hasher::new();
        hasher.update(&header);
        let blob_len = (blob.len() as u64).to_le_bytes();
        hasher.update(&blob_len);
        hasher.update(&blob);
        let crc = hasher.finalize();

        {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.write_all(&header)?;
            file.write_all(&blob_len)?;
            file.write_all(&blob)?;
            file.write_all(&crc.to_le_bytes())?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &final_path)?;
        File::open(&self.dir)?.sync_all()?;

        if let Err(err) = self.prune() {
            tracing::warn!(error = %err, "failed to prune old snapshots");
        }

        Ok(SnapshotInfo {
            path: final_path,
            watermark,
            created_at_ms,
            entries: entries.len(),
        })
    }

    /// Load the most recent snapshot, if any.
    ///
    /// A snapshot that fails validation is a corruption error; callers
    /// treat that as fatal at startup rather than silently starting empty
    /// over data that exists.
    pub fn load_latest(&self) -> Result<Option<LoadedSnapshot>> {
        let Some(path) = self.latest_path()? else {
            return Ok(None);
        };
        self.load(&path).map(Some)
    }

    /// Load a specific snapshot file.
    pub fn load(&self, path: &Path) -> Result<LoadedSnapshot> {
        let data = std::fs::read(path)?;
        let fail = |message: String| {
            Error::corruption(format!("snapshot {}: {message}", path.display()))
        };

        if data.len() < 4 + 4 + 8 + 8 + 8 + 2 {
            return Err(fail("file shorter than header".to_string()));
        }
        if data[0..4] != SNAPSHOT_MAGIC {
            return Err(fail("bad magic".to_string()));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().expect("4-byte slice"));
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(fail(format!("unsupported format version {version}")));
        }
        let watermark = u64::from_le_bytes(data[8..16].try_into().expect("8-byte slice"));
        let created_at_ms = u64::from_le_bytes(data[16..24].try_into().expect("8-byte slice"));
        let entry_count = u64::from_le_bytes(data[24..32].try_into().expect("8-byte slice"));
        let id_len = u16::from_le_bytes(data[32..34].try_into().expect("2-byte slice")) as usize;

        let blob_len_at = 34 + id_len;
        if data.len() < blob_len_at + 8 + 4 {
            return Err(fail("truncated header".to_string()));
        }
        let node_id = &data[34..blob_len_at];
        if node_id != self.node_id.as_bytes() {
            return Err(fail(format!(
                "snapshot belongs to node {:?}, expected {:?}",
                String::from_utf8_lossy(node_id),
                self.node_id
            )));
        }

        let blob_len = u64::from_le_bytes(
            data[blob_len_at..blob_len_at + 8]
                .try_into()
                .expect("8-byte slice"),
        ) as usize;
        let blob_at = blob_len_at + 8;
        let crc_at = blob_at + blob_len;
        if data.len() != crc_at + 4 {
            return Err(fail("payload length disagrees with file size".to_string()));
        }

        let mut hasher = Hasher::new();
        hasher.update(&data[..crc_at]);
        let actual = hasher.finalize();
        let stored = u32::from_le_bytes(data[crc_at..].try_into().expect("4-byte slice"));
        if actual != stored {
            return Err(fail(format!(
                "checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"
            )));
        }

        let entries: Vec<SnapshotEntry> = bincode::deserialize(&data[blob_at..crc_at])
            .map_err(|e| fail(format!("entry payload undecodable: {e}")))?;
        if entries.len() as u64 != entry_count {
            return Err(fail(format!(
                "header claims {entry_count} entries, payload has {}",
                entries.len()
            )));
        }

        Ok(LoadedSnapshot {
            watermark,
            created_at_ms,
            entries,
        })
    }

    /// Most recent snapshot path by lexicographic suffix.
    pub fn latest_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.list()?.into_iter().last())
    }

    /// All snapshot files for this node, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}_", self.node_id);
        let mut names = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && name.ends_with(".snap") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }

    /// Delete all but the newest `keep` snapshots. Returns the number
    /// removed.
    pub fn prune(&self) -> Result<usize> {
        let files = self.list()?;
        if files.len() <= self.keep {
            return Ok(0);
        }
        let excess = files.len() - self.keep;
        for path in &files[..excess] {
            std::fs::remove_file(path)?;
        }
        Ok(excess)
    }

    /// Remove temp files left behind by a crash mid-snapshot.
    pub fn cleanup_temp_files(&self) -> Result<usize> {
        let mut count = 0;
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && name.ends_with(".snap.tmp") {
                std::fs::remove_file(dirent.path())?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn snapshot_path(&self, created_at_ms: u64) -> PathBuf {
        self.dir
            .join(format!("{}_{:016}.snap", self.node_id, created_at_ms))
    }
}
