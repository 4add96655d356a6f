//! Cluster membership vocabulary
//!
//! Nodes are identified cluster-wide by an operator-chosen id. The proxy
//! places ids on the ring and the health service keys its records by id,
//! so both sides must parse `--cluster-nodes` identically.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One storage node as named on a proxy or checker command line.
///
/// Accepted forms:
/// - `id=host:port` — explicit node id
/// - `host:port` — the id defaults to the address string itself
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeSpec {
    /// Cluster-wide node identity (ring placement, health records)
    pub id: String,
    /// Hostname or IP the node listens on
    pub host: String,
    /// RESP port
    pub port: u16,
}

impl NodeSpec {
    /// `host:port` form for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}:{}", self.id, self.host, self.port)
    }
}

impl FromStr for NodeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = match s.split_once('=') {
            Some((id, addr)) => (Some(id), addr),
            None => (None, s),
        };

        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            Error::invalid_argument(format!("node spec '{s}' is missing a port"))
        })?;
        if host.is_empty() {
            return Err(Error::invalid_argument(format!(
                "node spec '{s}' has an empty host"
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            Error::invalid_argument(format!("node spec '{s}' has an invalid port '{port}'"))
        })?;

        let id = match id {
            Some("") => {
                return Err(Error::invalid_argument(format!(
                    "node spec '{s}' has an empty id"
                )))
            }
            Some(id) => id.to_string(),
            None => addr.to_string(),
        };

        Ok(NodeSpec {
            id,
            host: host.to_string(),
            port,
        })
    }
}

/// Parse a comma-separated `--cluster-nodes` value.
///
/// Duplicate ids are rejected: a duplicate would silently merge two ring
/// members and mis-route a fraction of the keyspace.
pub fn parse_cluster_nodes(s: &str) -> Result<Vec<NodeSpec>, Error> {
    let mut nodes = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let node: NodeSpec = part.parse()?;
        if nodes.iter().any(|n: &NodeSpec| n.id == node.id) {
            return Err(Error::invalid_argument(format!(
                "duplicate node id '{}' in cluster nodes",
                node.id
            )));
        }
        nodes.push(node);
    }
    if nodes.is_empty() {
        return Err(Error::invalid_argument(
            "cluster nodes list is empty".to_string(),
        ));
    }
    Ok(nodes)
}
