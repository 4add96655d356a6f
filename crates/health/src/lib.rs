//! Health registry and checker
//!
//! One checker process probes every registered node on a fixed cadence
//! and maintains a registry of health records. Proxies poll the registry
//! over HTTP and gate their routing decisions on it. The registry is an
//! explicit service constructed at process init and passed to consumers;
//! tests spin up as many independent instances as they like.

#![warn(clippy::all)]

pub mod checker;
pub mod http;
pub mod record;
pub mod registry;

pub use checker::HealthChecker;
pub use record::{HealthRecord, HealthStatus, HealthSummary};
pub use registry::HealthRegistry;
