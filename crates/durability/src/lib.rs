//! Durability layer: write-ahead log, snapshots, recovery
//!
//! - **WAL**: one append-only file per node (`wal/<node>.wal`) of
//!   length-prefixed, CRC32-checked records. Appends are serialized
//!   through a single writer and fsync'd before success is reported;
//!   concurrent appenders share fsyncs (group commit) but an append never
//!   returns before its bytes are durable.
//! - **Snapshots**: versioned full dumps (`snapshots/<node>_<ts>.snap`)
//!   written with the write → fsync → atomic rename → fsync-dir pattern,
//!   carrying the WAL sequence watermark they capture.
//! - **Recovery**: load the latest snapshot, replay WAL records past its
//!   watermark, stop cleanly at a torn tail.

#![warn(clippy::all)]

pub mod paths;
pub mod record;
pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use paths::{snapshots_dir, wal_dir, wal_path};
pub use record::{WalRecord, WalRecordError};
pub use recovery::{recover, RecoveredState, RecoveryReport};
pub use snapshot::{LoadedSnapshot, SnapshotEntry, SnapshotInfo, SnapshotStore};
pub use wal::{read_wal, TornTail, Wal, WalReadResult};
