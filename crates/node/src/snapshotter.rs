//! Periodic snapshot thread
//!
//! Takes a snapshot every configured interval. A failed snapshot is
//! logged and retried next cycle; the previous snapshot and the WAL stay
//! untouched, so durability never regresses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::Engine;

/// Background snapshot scheduler for an engine.
pub struct Snapshotter {
    engine: Arc<Engine>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Snapshotter {
    /// Create a snapshotter firing every `interval`.
    pub fn new(engine: Arc<Engine>, interval: Duration) -> Self {
        Snapshotter {
            engine,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the snapshot thread. Runs until [`Snapshotter::shutdown`].
    pub fn start(&self) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::Builder::new()
            .name("cachegrid-snapshot".to_string())
            .spawn(move || {
                let tick = Duration::from_millis(200).min(interval);
                loop {
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(tick);
                        elapsed += tick;
                    }
                    if let Err(err) = engine.snapshot() {
                        tracing::error!(error = %err, "periodic snapshot failed; keeping previous snapshot");
                    }
                }
            })
            .expect("failed to spawn snapshot thread")
    }

    /// Signal the snapshot thread to exit.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
