//! Liveness prober
//!
//! Every check interval, for each registered node: open a TCP connection,
//! send the literal PING frame, and expect `+PONG\r\n` back within the
//! timeout. Outcomes feed the registry; probe failures are local state
//! transitions and never propagate as errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use cachegrid_wire::{PING_FRAME, PONG_REPLY};

use crate::registry::HealthRegistry;

/// Periodic prober over a registry.
pub struct HealthChecker {
    registry: Arc<HealthRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a checker probing every `interval` with the given per-probe
    /// `timeout`.
    pub fn new(registry: Arc<HealthRegistry>, interval: Duration, timeout: Duration) -> Self {
        HealthChecker {
            registry,
            interval,
            timeout,
        }
    }

    /// Probe on a fixed cadence until `shutdown` flips to true. The first
    /// round runs immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Probe every registered node once.
    pub async fn check_all(&self) {
        for node_id in self.registry.node_ids() {
            let Some(record) = self.registry.get(&node_id) else {
                continue;
            };
            match self.probe(&record.addr()).await {
                Ok(latency_ms) => {
                    self.registry.record_success(&node_id, latency_ms);
                    tracing::debug!(node_id = %node_id, latency_ms, "probe ok");
                }
                Err(reason) => {
                    self.registry.record_failure(&node_id);
                    tracing::info!(node_id = %node_id, %reason, "probe failed");
                }
            }
        }
    }

    /// One PING round-trip. Returns the latency on success.
    async fn probe(&self, addr: &str) -> Result<u64, String> {
        let started = Instant::now();
        let attempt = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|e| format!("connect: {e}"))?;
            stream
                .write_all(PING_FRAME)
                .await
                .map_err(|e| format!("write: {e}"))?;

            let mut reply = [0u8; 7];
            let mut filled = 0;
            while filled < reply.len() {
                let read = stream
                    .read(&mut reply[filled..])
                    .await
                    .map_err(|e| format!("read: {e}"))?;
                if read == 0 {
                    return Err("connection closed before reply".to_string());
                }
                filled += read;
            }
            if reply != PONG_REPLY[..] {
                return Err(format!(
                    "unexpected reply {:?}",
                    String::from_utf8_lossy(&reply)
                ));
            }
            Ok(())
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(())) => Ok(started.elapsed().as_millis() as u64),
            Ok(Err(reason)) => Err(reason),
            Err(_) => Err(format!("timed out after {:?}", self.timeout)),
        }
    }
}
