//! Proxy configuration

use std::time::Duration;

use cachegrid_core::NodeSpec;

use crate::ring::DEFAULT_VNODES;

/// Everything a proxy needs to start.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Proxy identity, used in logs and CLUSTER INFO
    pub proxy_id: String,
    /// Cluster membership (static for the life of the process)
    pub nodes: Vec<NodeSpec>,
    /// Base URL of the health service
    pub health_service: String,
    /// How often the health registry is polled
    pub poll_interval: Duration,
    /// The checker's probe cadence; staleness is twice this
    pub check_interval: Duration,
    /// Per-request timeout toward a backend node
    pub backend_timeout: Duration,
    /// Virtual positions per node on the ring
    pub vnodes: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            proxy_id: "proxy1".to_string(),
            nodes: Vec::new(),
            health_service: "http://127.0.0.1:8080".to_string(),
            poll_interval: Duration::from_secs(15),
            check_interval: Duration::from_secs(30),
            backend_timeout: Duration::from_secs(5),
            vnodes: DEFAULT_VNODES,
        }
    }
}

impl ProxyConfig {
    /// A health snapshot older than this is treated as UNKNOWN.
    pub fn stale_after(&self) -> Duration {
        self.check_interval * 2
    }

    /// `host:port` the proxy listens on.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_is_twice_the_check_interval() {
        let config = ProxyConfig {
            check_interval: Duration::from_secs(10),
            ..ProxyConfig::default()
        };
        assert_eq!(config.stale_after(), Duration::from_secs(20));
    }
}
