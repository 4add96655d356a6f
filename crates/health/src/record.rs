//! Health record types
//!
//! These structs are both the registry's storage format and the JSON
//! bodies of the HTTP API, so the field names are part of the contract.

use serde::{Deserialize, Serialize};

/// Observed liveness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Last probe succeeded
    Healthy,
    /// Failed at least the threshold number of consecutive probes
    Unhealthy,
    /// Not probed yet (or probed too long ago to trust)
    Unknown,
}

/// Liveness state of one node. Created on registration, updated by the
/// checker, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    /// Cluster-wide node identity
    pub node_id: String,
    /// Probe target host
    pub host: String,
    /// Probe target port
    pub port: u16,
    /// Current status
    pub status: HealthStatus,
    /// Time of the most recent probe (epoch millis)
    pub last_check: Option<u64>,
    /// Round-trip latency of the most recent successful probe
    pub last_latency_ms: Option<u64>,
    /// Probe failures since the last success
    pub consecutive_failures: u32,
}

impl HealthRecord {
    /// Fresh record for a newly registered node.
    pub fn new(node_id: String, host: String, port: u16) -> Self {
        HealthRecord {
            node_id,
            host,
            port,
            status: HealthStatus::Unknown,
            last_check: None,
            last_latency_ms: None,
            consecutive_failures: 0,
        }
    }

    /// Probe target address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Cluster-wide roll-up of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    /// Registered nodes
    pub total_nodes: usize,
    /// Nodes currently Healthy
    pub healthy: usize,
    /// Nodes currently Unhealthy
    pub unhealthy: usize,
    /// healthy / total, as a percentage (0 when the registry is empty)
    pub percentage: f64,
}
