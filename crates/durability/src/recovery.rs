//! Startup recovery
//!
//! Recovery is a pure read: locate the latest snapshot, scan the WAL, and
//! hand back the entries to load plus the records to replay. The caller
//! applies them to its store and then opens the WAL for writing (which is
//! where any torn tail physically gets truncated).

use std::path::Path;

use cachegrid_core::Result;

use crate::snapshot::{SnapshotEntry, SnapshotStore};
use crate::wal::read_wal;
use crate::WalRecord;

/// What recovery found.
#[derive(Debug)]
pub struct RecoveredState {
    /// Entries from the latest snapshot (empty when none exists)
    pub entries: Vec<SnapshotEntry>,
    /// WAL records past the snapshot watermark, in log order
    pub records: Vec<WalRecord>,
    /// Sequence number the node resumes at
    pub next_seq: u64,
    /// Summary for logging
    pub report: RecoveryReport,
}

/// Recovery summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether a snapshot was found and loaded
    pub snapshot_loaded: bool,
    /// Replay floor: records at or below this were skipped
    pub watermark: u64,
    /// Records selected for replay
    pub replayed: usize,
    /// Records skipped because the snapshot already covers them
    pub skipped: usize,
    /// Bytes past the last valid WAL record (torn tail)
    pub truncated_bytes: u64,
}

/// Read the persisted state of a node.
///
/// Fails only on unreadable files or a corrupt snapshot — both are fatal
/// at startup. A torn WAL tail is not an error: replay stops at the last
/// good record and the truncation is reported.
pub fn recover(snapshots: &SnapshotStore, wal_path: &Path) -> Result<RecoveredState> {
    let removed = snapshots.cleanup_temp_files()?;
    if removed > 0 {
        tracing::info!(removed, "removed incomplete snapshot temp files");
    }

    let loaded = snapshots.load_latest()?;
    let (entries, watermark, snapshot_loaded) = match loaded {
        Some(snapshot) => {
            tracing::info!(
                watermark = snapshot.watermark,
                entries = snapshot.entries.len(),
                "loaded snapshot"
            );
            (snapshot.entries, snapshot.watermark, true)
        }
        None => (Vec::new(), 0, false),
    };

    let scan = read_wal(wal_path)?;
    let truncated_bytes = scan.truncated_bytes();
    if let Some(torn) = &scan.torn {
        tracing::warn!(
            offset = torn.offset,
            dropped_bytes = truncated_bytes,
            reason = %torn.reason,
            "WAL scan stopped before end of file"
        );
    }

    let total = scan.records.len();
    let max_seq = scan.records.iter().map(|r| r.seq).max().unwrap_or(0);
    let records: Vec<WalRecord> = scan
        .records
        .into_iter()
        .filter(|r| r.seq > watermark)
        .collect();
    let replayed = records.len();
    let skipped = total - replayed;
    let next_seq = max_seq.max(watermark) + 1;

    tracing::info!(replayed, skipped, next_seq, "WAL scan complete");

    Ok(RecoveredState {
        entries,
        records,
        next_seq,
        report: RecoveryReport {
            snapshot_loaded,
            watermark,
            replayed,
            skipped,
            truncated_bytes,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{snapshots_dir, wal_path};
    use crate::snapshot::SnapshotEntry;
    use crate::wal::Wal;
    use cachegrid_core::{Value, WalOp};
    use tempfile::tempdir;

    fn set_op(key: &[u8]) -> WalOp {
        WalOp::Set {
            key: key.to_vec(),
            value: b"v".to_vec(),
            expires_at_ms: None,
        }
    }

    fn entry(key: &[u8]) -> SnapshotEntry {
        SnapshotEntry {
            key: key.to_vec(),
            value: Value::Str(b"v".to_vec()),
            created_at_ms: 0,
            expires_at_ms: None,
            last_access_ms: 0,
            access_count: 0,
        }
    }

    #[test]
    fn empty_data_dir_recovers_empty() {
        let dir = tempdir().unwrap();
        let snaps = SnapshotStore::new(snapshots_dir(dir.path()), "n1", 3).unwrap();
        let state = recover(&snaps, &wal_path(dir.path(), "n1")).unwrap();
        assert!(state.entries.is_empty());
        assert!(state.records.is_empty());
        assert_eq!(state.next_seq, 1);
        assert!(!state.report.snapshot_loaded);
    }

    #[test]
    fn wal_only_recovery_replays_everything() {
        let dir = tempdir().unwrap();
        let wal_file = wal_path(dir.path(), "n1");
        {
            let wal = Wal::open(&wal_file).unwrap();
            wal.append_op(&set_op(b"a")).unwrap();
            wal.append_op(&set_op(b"b")).unwrap();
        }
        let snaps = SnapshotStore::new(snapshots_dir(dir.path()), "n1", 3).unwrap();
        let state = recover(&snaps, &wal_file).unwrap();
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.next_seq, 3);
        assert_eq!(state.report.skipped, 0);
    }

    #[test]
    fn snapshot_floor_skips_covered_records() {
        let dir = tempdir().unwrap();
        let wal_file = wal_path(dir.path(), "n1");
        {
            let wal = Wal::open(&wal_file).unwrap();
            for key in [b"a".as_slice(), b"b", b"c", b"d"] {
                wal.append_op(&set_op(key)).unwrap();
            }
        }
        let snaps = SnapshotStore::new(snapshots_dir(dir.path()), "n1", 3).unwrap();
        snaps.write(2, &[entry(b"a"), entry(b"b")]).unwrap();

        let state = recover(&snaps, &wal_file).unwrap();
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.records.len(), 2);
        assert!(state.records.iter().all(|r| r.seq > 2));
        assert_eq!(state.report.skipped, 2);
        assert_eq!(state.next_seq, 5);
    }

    #[test]
    fn watermark_beyond_wal_still_advances_seq() {
        let dir = tempdir().unwrap();
        let wal_file = wal_path(dir.path(), "n1");
        let snaps = SnapshotStore::new(snapshots_dir(dir.path()), "n1", 3).unwrap();
        // Snapshot taken at seq 10, WAL truncated to empty afterwards.
        snaps.write(10, &[entry(b"a")]).unwrap();

        let state = recover(&snaps, &wal_file).unwrap();
        assert_eq!(state.next_seq, 11);
        assert!(state.records.is_empty());
    }

    #[test]
    fn torn_tail_is_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let wal_file = wal_path(dir.path(), "n1");
        {
            let wal = Wal::open(&wal_file).unwrap();
            wal.append_op(&set_op(b"a")).unwrap();
            wal.append_op(&set_op(b"b")).unwrap();
        }
        let len = std::fs::metadata(&wal_file).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&wal_file)
            .unwrap();
        file.set_len(len - 5).unwrap();
        drop(file);

        let snaps = SnapshotStore::new(snapshots_dir(dir.path()), "n1", 3).unwrap();
        let state = recover(&snaps, &wal_file).unwrap();
        assert_eq!(state.records.len(), 1);
        assert!(state.report.truncated_bytes > 0);
        assert_eq!(state.next_seq, 2);
    }
}
