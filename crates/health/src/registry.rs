//! The health registry
//!
//! Thread-safe for many concurrent readers and the single writer (the
//! checker). Records are updated atomically per node: readers see either
//! the pre-probe or post-probe record, never a half-written one.

use dashmap::DashMap;

use cachegrid_core::entry::epoch_ms;
use cachegrid_core::NodeSpec;

use crate::record::{HealthRecord, HealthStatus, HealthSummary};

/// Registry of node health records.
pub struct HealthRegistry {
    records: DashMap<String, HealthRecord>,
    failure_threshold: u32,
}

impl HealthRegistry {
    /// Create a registry that flips nodes to Unhealthy after
    /// `failure_threshold` consecutive probe failures.
    pub fn new(failure_threshold: u32) -> Self {
        HealthRegistry {
            records: DashMap::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Register a node. Idempotent: re-registering keeps existing state.
    pub fn register(&self, spec: &NodeSpec) {
        self.records
            .entry(spec.id.clone())
            .or_insert_with(|| HealthRecord::new(spec.id.clone(), spec.host.clone(), spec.port));
    }

    /// Record a successful probe. One success recovers an Unhealthy node
    /// immediately.
    pub fn record_success(&self, node_id: &str, latency_ms: u64) {
        if let Some(mut record) = self.records.get_mut(node_id) {
            record.status = HealthStatus::Healthy;
            record.consecutive_failures = 0;
            record.last_check = Some(epoch_ms());
            record.last_latency_ms = Some(latency_ms);
        }
    }

    /// Record a failed probe. The status only degrades once the failure
    /// streak reaches the threshold, which keeps one dropped packet from
    /// flapping the node out of rotation.
    pub fn record_failure(&self, node_id: &str) {
        if let Some(mut record) = self.records.get_mut(node_id) {
            record.consecutive_failures += 1;
            record.last_check = Some(epoch_ms());
            if record.consecutive_failures >= self.failure_threshold {
                record.status = HealthStatus::Unhealthy;
            }
        }
    }

    /// Record for one node.
    pub fn get(&self, node_id: &str) -> Option<HealthRecord> {
        self.records.get(node_id).map(|r| r.clone())
    }

    /// Registered node ids.
    pub fn node_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Cluster-wide roll-up.
    pub fn summary(&self) -> HealthSummary {
        let total_nodes = self.records.len();
        let mut healthy = 0;
        let mut unhealthy = 0;
        for record in self.records.iter() {
            match record.status {
                HealthStatus::Healthy => healthy += 1,
                HealthStatus::Unhealthy => unhealthy += 1,
                HealthStatus::Unknown => {}
            }
        }
        let percentage = if total_nodes == 0 {
            0.0
        } else {
            healthy as f64 * 100.0 / total_nodes as f64
        };
        HealthSummary {
            total_nodes,
            healthy,
            unhealthy,
            percentage,
        }
    }

    /// All records currently Healthy.
    pub fn list_healthy(&self) -> Vec<HealthRecord> {
        self.list_with_status(HealthStatus::Healthy)
    }

    /// All records currently Unhealthy.
    pub fn list_unhealthy(&self) -> Vec<HealthRecord> {
        self.list_with_status(HealthStatus::Unhealthy)
    }

    fn list_with_status(&self, status: HealthStatus) -> Vec<HealthRecord> {
        let mut out: Vec<HealthRecord> = self
            .records
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }
}
