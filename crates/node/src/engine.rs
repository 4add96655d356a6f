//! Node engine: store + durability glue
//!
//! The engine owns the store, the WAL, and the snapshot directory, and is
//! the only place that sequences them against each other:
//!
//! - **Open**: recover (snapshot + WAL replay), then open the WAL for
//!   writing and wire it into the store as the mutation sink.
//! - **Snapshot**: capture the WAL watermark, dump the store one shard at
//!   a time, write the snapshot crash-safely, then truncate the WAL past
//!   the watermark. Writes continue during the dump; any record past the
//!   watermark survives truncation and is re-applied on recovery (ops
//!   carry absolute state, so re-application converges).
//! - **Shutdown**: flush the WAL and take a final snapshot.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use cachegrid_core::{Result, WalSink};
use cachegrid_durability::{
    recover, snapshots_dir, wal_path, SnapshotEntry, SnapshotInfo, SnapshotStore, Wal,
};
use cachegrid_store::PartitionedStore;

use crate::config::NodeConfig;

/// A running node's storage engine.
pub struct Engine {
    store: Arc<PartitionedStore>,
    wal: Option<Arc<Wal>>,
    snapshots: Option<SnapshotStore>,
    node_id: String,
    started_at: Instant,
    /// Only one snapshot writer at a time
    snapshot_gate: Mutex<()>,
}

impl Engine {
    /// Open the engine, recovering persisted state when persistence is on.
    ///
    /// Fails on a corrupt snapshot or unreadable data dir; those are
    /// startup-fatal for the node.
    pub fn open(config: &NodeConfig) -> Result<Engine> {
        config.store.validate()?;

        if !config.persistence {
            let store = Arc::new(PartitionedStore::new(config.store.clone())?);
            return Ok(Engine {
                store,
                wal: None,
                snapshots: None,
                node_id: config.node_id.clone(),
                started_at: Instant::now(),
                snapshot_gate: Mutex::new(()),
            });
        }

        let snapshots = SnapshotStore::new(
            snapshots_dir(&config.data_dir),
            &config.node_id,
            config.keep_snapshots,
        )?;
        let wal_file = wal_path(&config.data_dir, &config.node_id);

        let recovered = recover(&snapshots, &wal_file)?;

        // Opening the WAL truncates the torn tail recovery stopped at.
        let wal = Arc::new(Wal::open(&wal_file)?);
        wal.bump_next_seq(recovered.next_seq.saturating_sub(1));

        let sink: Arc<dyn WalSink> = Arc::clone(&wal) as Arc<dyn WalSink>;
        let store = Arc::new(PartitionedStore::with_wal(config.store.clone(), sink)?);

        let loaded = recovered.entries.len();
        for snapshot_entry in recovered.entries {
            let (key, entry) = snapshot_entry.into_entry();
            store.load_entry(key, entry);
        }
        for record in &recovered.records {
            store.apply_replay(&record.op, record.timestamp_ms);
        }
        tracing::info!(
            node_id = %config.node_id,
            snapshot_entries = loaded,
            replayed = recovered.report.replayed,
            next_seq = recovered.next_seq,
            "engine recovered"
        );

        Ok(Engine {
            store,
            wal: Some(wal),
            snapshots: Some(snapshots),
            node_id: config.node_id.clone(),
            started_at: Instant::now(),
            snapshot_gate: Mutex::new(()),
        })
    }

    /// The store this engine serves.
    pub fn store(&self) -> &Arc<PartitionedStore> {
        &self.store
    }

    /// Node identity.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Take a snapshot and truncate the WAL behind it.
    ///
    /// Returns `None` when persistence is disabled. On snapshot failure
    /// the previous snapshot stays in place and the WAL is left alone.
    pub fn snapshot(&self) -> Result<Option<SnapshotInfo>> {
        let (Some(wal), Some(snapshots)) = (&self.wal, &self.snapshots) else {
            return Ok(None);
        };
        let _gate = self.snapshot_gate.lock();

        let watermark = wal.last_seq();
        let entries: Vec<SnapshotEntry> = self
            .store
            .dump()
            .into_iter()
            .map(|(key, entry)| SnapshotEntry::capture(key, &entry))
            .collect();

        let info = snapshots.write(watermark, &entries)?;
        wal.truncate_through(watermark)?;
        tracing::info!(
            watermark,
            entries = info.entries,
            path = %info.path.display(),
            "snapshot complete"
        );
        Ok(Some(info))
    }

    /// Flush the WAL and take a final snapshot.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.flush()?;
        }
        self.snapshot()?;
        Ok(())
    }

    /// Human-readable stats payload for INFO / STATS.
    pub fn info_text(&self) -> String {
        let stats = self.store.stats();
        let mut out = String::new();
        out.push_str("# node\r\n");
        out.push_str(&format!("node_id:{}\r\n", self.node_id));
        out.push_str(&format!(
            "uptime_seconds:{}\r\n",
            self.started_at.elapsed().as_secs()
        ));
        out.push_str(&format!(
            "persistence:{}\r\n",
            if self.wal.is_some() { "enabled" } else { "disabled" }
        ));
        if let Some(wal) = &self.wal {
            out.push_str(&format!("wal_last_seq:{}\r\n", wal.last_seq()));
        }
        out.push_str("# keyspace\r\n");
        out.push_str(&format!("size:{}\r\n", stats.size()));
        out.push_str(&format!("shards:{}\r\n", stats.shard_sizes.len()));
        out.push_str("# stats\r\n");
        out.push_str(&format!("hits:{}\r\n", stats.hits));
        out.push_str(&format!("misses:{}\r\n", stats.misses));
        out.push_str(&format!("hit_rate:{:.4}\r\n", stats.hit_rate()));
        out.push_str(&format!("evictions:{}\r\n", stats.evictions));
        out.push_str(&format!("expirations:{}\r\n", stats.expirations));
        out
    }
}
