//! CacheGrid proxy
//!
//! Stateless RESP front-end: parses client frames, maps each key to its
//! owning node on a consistent-hash ring, gates the dispatch on the
//! node's health, and forwards over a pooled backend connection. Routing
//! is deterministic — an unhealthy target fails the command, it never
//! silently re-routes.

#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod health_cache;
pub mod ring;
pub mod server;

pub use backend::BackendPool;
pub use config::ProxyConfig;
pub use health_cache::HealthCache;
pub use ring::{HashRing, Router, DEFAULT_VNODES};
pub use server::ProxyState;
