//! Proxy-local view of the health registry
//!
//! A background poller fetches the healthy and unhealthy lists from the
//! health service and swaps in an immutable snapshot. The routing gate
//! reads that snapshot:
//!
//! - snapshot older than T_stale (or never fetched) → every node is
//!   UNKNOWN-stale → gate closed
//! - node in the unhealthy list → gate closed
//! - node in the healthy list → gate open
//! - node in neither list → it has never passed a probe → gate closed
//!
//! The gate never re-routes: the data lives on exactly one node, so a
//! closed gate fails the command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;

use cachegrid_core::{Error, Result};
use cachegrid_health::{HealthRecord, HealthStatus};

/// Immutable poll result.
#[derive(Debug)]
struct HealthView {
    records: HashMap<String, HealthStatus>,
    fetched_at: Instant,
}

/// Cached registry view plus the poller that refreshes it.
pub struct HealthCache {
    base_url: String,
    stale_after: Duration,
    client: reqwest::Client,
    view: RwLock<Option<Arc<HealthView>>>,
}

impl HealthCache {
    /// Create a cache polling `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>, stale_after: Duration) -> HealthCache {
        HealthCache {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stale_after,
            client: reqwest::Client::new(),
            view: RwLock::new(None),
        }
    }

    /// Fetch both status lists and swap in a fresh snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let healthy = self.fetch_list("/health/healthy").await?;
        let unhealthy = self.fetch_list("/health/unhealthy").await?;

        let mut records = HashMap::with_capacity(healthy.len() + unhealthy.len());
        for record in healthy {
            records.insert(record.node_id, HealthStatus::Healthy);
        }
        for record in unhealthy {
            records.insert(record.node_id, HealthStatus::Unhealthy);
        }

        *self.view.write() = Some(Arc::new(HealthView {
            records,
            fetched_at: Instant::now(),
        }));
        Ok(())
    }

    async fn fetch_list(&self, path: &str) -> Result<Vec<HealthRecord>> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::backend(format!("health service {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::backend(format!(
                "health service {url}: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::backend(format!("health service {url}: bad body: {e}")))
    }

    /// Poll until `shutdown` flips to true. Failed polls are logged; the
    /// old snapshot ages out naturally and the gate starts failing closed.
    pub async fn poll_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.refresh().await {
                        tracing::warn!(error = %err, "health poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Effective status of a node as this proxy sees it right now.
    pub fn status(&self, node_id: &str) -> HealthStatus {
        let view = self.view.read();
        let Some(view) = view.as_ref() else {
            return HealthStatus::Unknown;
        };
        if view.fetched_at.elapsed() > self.stale_after {
            return HealthStatus::Unknown;
        }
        view.records
            .get(node_id)
            .copied()
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Gate a dispatch to `node_id`: `Ok` to proceed, error to fail the
    /// command without touching the backend.
    pub fn gate(&self, node_id: &str) -> Result<()> {
        match self.status(node_id) {
            HealthStatus::Healthy => Ok(()),
            HealthStatus::Unhealthy | HealthStatus::Unknown => {
                Err(Error::node_unhealthy(node_id))
            }
        }
    }

    /// Counts of (healthy, unhealthy) in the current snapshot.
    pub fn counts(&self) -> (usize, usize) {
        let view = self.view.read();
        let Some(view) = view.as_ref() else {
            return (0, 0);
        };
        let healthy = view
            .records
            .values()
            .filter(|s| **s == HealthStatus::Healthy)
            .count();
        (healthy, view.records.len() - healthy)
    }

    #[cfg(test)]
    fn install_view(&self, records: HashMap<String, HealthStatus>) {
        *self.view.write() = Some(Arc::new(HealthView {
            records,
            fetched_at: Instant::now(),
        }));
    }
}
