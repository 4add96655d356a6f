//! Background expiry sweeper
//!
//! Runs in a dedicated thread and periodically removes expired entries
//! through the store's normal expiration path, so every removal is logged
//! and counted exactly like a lazy expiry. Shutdown is a cooperative
//! atomic flag checked between short sleeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cachegrid_core::entry::epoch_ms;

use crate::store::PartitionedStore;

/// Periodic expired-entry sweeper for a store.
pub struct ExpirySweeper {
    store: Arc<PartitionedStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl ExpirySweeper {
    /// Create a sweeper over `store` firing every `interval`.
    pub fn new(store: Arc<PartitionedStore>, interval: Duration) -> Self {
        ExpirySweeper {
            store,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweeper thread. Runs until [`ExpirySweeper::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::Builder::new()
            .name("cachegrid-sweeper".to_string())
            .spawn(move || {
                let tick = Duration::from_millis(50).min(interval);
                loop {
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(tick);
                        elapsed += tick;
                    }
                    let removed = store.sweep_expired(epoch_ms());
                    if removed > 0 {
                        tracing::debug!(removed, "expiry sweep removed entries");
                    }
                }
            })
            .expect("failed to spawn sweeper thread")
    }

    /// Signal the sweeper thread to exit at its next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn sweeper_removes_expired_entries() {
        let store = Arc::new(PartitionedStore::new(StoreConfig::default()).unwrap());
        store
            .set(b"gone", b"v".to_vec(), Some(Duration::from_millis(10)))
            .unwrap();
        store.set(b"stays", b"v".to_vec(), None).unwrap();

        let sweeper = ExpirySweeper::new(Arc::clone(&store), Duration::from_millis(20));
        let handle = sweeper.start();

        // Give the sweeper a few ticks to observe the expiration.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while store.size() > 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        sweeper.shutdown();
        handle.join().unwrap();

        assert_eq!(store.size(), 1);
        assert!(store.exists(b"stays").unwrap());
        assert!(store.stats().expirations >= 1);
    }

    #[test]
    fn shutdown_stops_the_thread() {
        let store = Arc::new(PartitionedStore::new(StoreConfig::default()).unwrap());
        let sweeper = ExpirySweeper::new(store, Duration::from_secs(3600));
        let handle = sweeper.start();
        assert!(!sweeper.is_shutdown());
        sweeper.shutdown();
        handle.join().unwrap();
        assert!(sweeper.is_shutdown());
    }
}
