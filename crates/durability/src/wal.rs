//! Single-file write-ahead log
//!
//! One append-only file per node. Appends are serialized through the
//! writer mutex; fsync happens before an append returns, but concurrent
//! appenders piggyback on each other's fsyncs (group commit): if another
//! append already synced past our bytes, we skip the syscall.
//!
//! Opening the log scans it, truncates any torn tail left by a crash, and
//! resumes the sequence counter after the highest surviving record.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use cachegrid_core::entry::epoch_ms;
use cachegrid_core::{Error, Result, WalOp, WalSink};

use crate::record::{WalRecord, WalRecordError};

/// Torn or corrupt tail found while scanning a WAL file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    /// Offset of the first invalid byte
    pub offset: u64,
    /// Why the scan stopped
    pub reason: String,
}

/// Result of scanning a WAL file.
#[derive(Debug)]
pub struct WalReadResult {
    /// Valid records, in log order
    pub records: Vec<WalRecord>,
    /// Offset one past the last valid record
    pub valid_end: u64,
    /// File length at scan time
    pub file_len: u64,
    /// Present when the file extends past `valid_end`
    pub torn: Option<TornTail>,
}

impl WalReadResult {
    /// Bytes past the last valid record.
    pub fn truncated_bytes(&self) -> u64 {
        self.file_len - self.valid_end
    }
}

/// Scan a WAL file, stopping cleanly at the first invalid record.
///
/// A missing file reads as an empty log.
pub fn read_wal(path: &Path) -> Result<WalReadResult> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(WalReadResult {
                records: Vec::new(),
                valid_end: 0,
                file_len: 0,
                torn: None,
            })
        }
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut torn = None;
    while offset < data.len() {
        match WalRecord::from_bytes(&data[offset..]) {
            Ok((record, used)) => {
                records.push(record);
                offset += used;
            }
            Err(err) => {
                let reason = match err {
                    WalRecordError::Insufficient => "torn tail".to_string(),
                    other => other.to_string(),
                };
                torn = Some(TornTail {
                    offset: offset as u64,
                    reason,
                });
                break;
            }
        }
    }

    Ok(WalReadResult {
        records,
        valid_end: offset as u64,
        file_len: data.len() as u64,
        torn,
    })
}

struct WalInner {
    file: File,
}

struct SyncState {
    file: File,
    synced: u64,
}

/// Append-only WAL for one node.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
    sync: Mutex<SyncState>,
    /// Bytes written so far (updated under the inner lock, read by sync)
    written: AtomicU64,
    /// Next sequence number to assign (updated under the inner lock)
    next_seq: AtomicU64,
}

impl Wal {
    /// Open (or create) the WAL at `path`.
    ///
    /// Any torn tail from a previous crash is truncated here, before the
    /// first new append can land behind garbage.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let scan = read_wal(path)?;
        if let Some(torn) = &scan.torn {
            tracing::warn!(
                path = %path.display(),
                offset = torn.offset,
                dropped_bytes = scan.truncated_bytes(),
                reason = %torn.reason,
                "truncating invalid WAL tail"
            );
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if scan.file_len > scan.valid_end {
            file.set_len(scan.valid_end)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_end))?;

        let max_seq = scan.records.iter().map(|r| r.seq).max().unwrap_or(0);
        let sync_file = file.try_clone()?;

        Ok(Wal {
            path: path.to_path_buf(),
            inner: Mutex::new(WalInner { file }),
            sync: Mutex::new(SyncState {
                file: sync_file,
                synced: scan.valid_end,
            }),
            written: AtomicU64::new(scan.valid_end),
            next_seq: AtomicU64::new(max_seq + 1),
        })
    }

    /// Last sequence number handed out, 0 before the first append.
    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire) - 1
    }

    /// Ensure the sequence counter resumes after `floor`.
    ///
    /// Called after recovery when the snapshot watermark is ahead of
    /// everything left in the log.
    pub fn bump_next_seq(&self, floor: u64) {
        let _guard = self.inner.lock();
        let next = self.next_seq.load(Ordering::Acquire);
        if floor + 1 > next {
            self.next_seq.store(floor + 1, Ordering::Release);
        }
    }

    /// Append one op and make it durable. Returns the assigned sequence
    /// number.
    pub fn append_op(&self, op: &WalOp) -> Result<u64> {
        let (seq, my_end) = {
            let mut inner = self.inner.lock();
            let seq = self.next_seq.load(Ordering::Acquire);
            let record = WalRecord::new(seq, epoch_ms(), op.clone());
            let bytes = record.to_bytes();
            inner
                .file
                .write_all(&bytes)
                .map_err(|e| Error::durability_with_source("WAL append failed", e))?;
            self.next_seq.store(seq + 1, Ordering::Release);
            let end = self.written.load(Ordering::Acquire) + bytes.len() as u64;
            self.written.store(end, Ordering::Release);
            (seq, end)
        };
        self.ensure_synced(my_end)?;
        Ok(seq)
    }

    /// Flush everything written so far to stable storage.
    pub fn flush(&self) -> Result<()> {
        let end = self.written.load(Ordering::Acquire);
        self.ensure_synced(end)
    }

    fn ensure_synced(&self, end: u64) -> Result<()> {
        let mut sync = self.sync.lock();
        if sync.synced >= end {
            // A concurrent append already fsync'd past our bytes.
            return Ok(());
        }
        // Everything written before this load is in the file when
        // sync_data runs, so the fsync covers at least `covered` bytes.
        let covered = self.written.load(Ordering::Acquire);
        sync.file
            .sync_data()
            .map_err(|e| Error::durability_with_source("WAL fsync failed", e))?;
        sync.synced = sync.synced.max(covered);
        Ok(())
    }

    /// Drop every record with `seq <= watermark`, atomically.
    ///
    /// The surviving suffix is rewritten to a temp file which replaces the
    /// log via rename; a crash in between leaves either the old or the new
    /// log, never a mix. Called after a successful snapshot.
    pub fn truncate_through(&self, watermark: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut sync = self.sync.lock();

        let data = std::fs::read(&self.path)?;
        let mut keep = Vec::new();
        let mut offset = 0usize;
        while offset < data.len() {
            match WalRecord::from_bytes(&data[offset..]) {
                Ok((record, used)) => {
                    if record.seq > watermark {
                        keep.extend_from_slice(&data[offset..offset + used]);
                    }
                    offset += used;
                }
                Err(_) => break,
            }
        }

        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&keep)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }

        // The old file handles point at the replaced inode; reopen.
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        sync.file = file.try_clone()?;
        sync.synced = keep.len() as u64;
        inner.file = file;
        self.written.store(keep.len() as u64, Ordering::Release);
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WalSink for Wal {
    fn append(&self, op: &WalOp) -> Result<u64> {
        self.append_op(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set_op(key: &[u8], value: &[u8]) -> WalOp {
        WalOp::Set {
            key: key.to_vec(),
            value: value.to_vec(),
            expires_at_ms: None,
        }
    }

    #[test]
    fn appends_assign_contiguous_seqs() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(&dir.path().join("n1.wal")).unwrap();
        assert_eq!(wal.append_op(&set_op(b"a", b"1")).unwrap(), 1);
        assert_eq!(wal.append_op(&set_op(b"b", b"2")).unwrap(), 2);
        assert_eq!(wal.last_seq(), 2);
    }

    #[test]
    fn reopen_resumes_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        {
            let wal = Wal::open(&path).unwrap();
            wal.append_op(&set_op(b"a", b"1")).unwrap();
            wal.append_op(&set_op(b"b", b"2")).unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.append_op(&set_op(b"c", b"3")).unwrap(), 3);

        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 3);
        assert_eq!(
            scan.records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        {
            let wal = Wal::open(&path).unwrap();
            wal.append_op(&set_op(b"a", b"1")).unwrap();
            wal.append_op(&set_op(b"b", b"2")).unwrap();
        }
        // Chop into the middle of the last record.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.torn.is_some());

        let wal = Wal::open(&path).unwrap();
        // The torn record (seq 2) is gone; the counter resumes after 1.
        assert_eq!(wal.append_op(&set_op(b"c", b"3")).unwrap(), 2);
        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert!(scan.torn.is_none());
    }

    #[test]
    fn corrupt_middle_record_stops_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        {
            let wal = Wal::open(&path).unwrap();
            wal.append_op(&set_op(b"a", b"1")).unwrap();
            wal.append_op(&set_op(b"b", b"2")).unwrap();
            wal.append_op(&set_op(b"c", b"3")).unwrap();
        }
        // Flip a byte inside the second record's body.
        let mut data = std::fs::read(&path).unwrap();
        let first_len = {
            let (_, used) = WalRecord::from_bytes(&data).unwrap();
            used
        };
        data[first_len + 10] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.torn.unwrap().reason.contains("checksum"));
    }

    #[test]
    fn truncate_through_drops_covered_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        let wal = Wal::open(&path).unwrap();
        for i in 1..=5u64 {
            wal.append_op(&set_op(format!("k{i}").as_bytes(), b"v")).unwrap();
        }
        wal.truncate_through(3).unwrap();

        let scan = read_wal(&path).unwrap();
        assert_eq!(
            scan.records.iter().map(|r| r.seq).collect::<Vec<_>>(),
            vec![4, 5]
        );

        // The log still accepts appends with the original counter.
        assert_eq!(wal.append_op(&set_op(b"after", b"v")).unwrap(), 6);
        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 3);
    }

    #[test]
    fn truncate_through_everything_empties_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        let wal = Wal::open(&path).unwrap();
        wal.append_op(&set_op(b"a", b"1")).unwrap();
        wal.append_op(&set_op(b"b", b"2")).unwrap();
        wal.truncate_through(2).unwrap();

        let scan = read_wal(&path).unwrap();
        assert!(scan.records.is_empty());
        assert_eq!(scan.file_len, 0);
    }

    #[test]
    fn bump_next_seq_only_moves_forward() {
        let dir = tempdir().unwrap();
        let wal = Wal::open(&dir.path().join("n1.wal")).unwrap();
        wal.bump_next_seq(10);
        assert_eq!(wal.append_op(&set_op(b"a", b"1")).unwrap(), 11);
        wal.bump_next_seq(5);
        assert_eq!(wal.append_op(&set_op(b"b", b"2")).unwrap(), 12);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let scan = read_wal(&dir.path().join("absent.wal")).unwrap();
        assert!(scan.records.is_empty());
        assert!(scan.torn.is_none());
    }

    #[test]
    fn concurrent_appends_all_land() {
        use std::sync::Arc;
        let dir = tempdir().unwrap();
        let path = dir.path().join("n1.wal");
        let wal = Arc::new(Wal::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let wal = Arc::clone(&wal);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        wal.append_op(&set_op(format!("t{t}-k{i}").as_bytes(), b"v"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let scan = read_wal(&path).unwrap();
        assert_eq!(scan.records.len(), 100);
        // Sequence numbers are contiguous and strictly increasing.
        let seqs: Vec<u64> = scan.records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (1..=100).collect::<Vec<_>>());
    }
}
