//! Error types for CacheGrid
//!
//! A single error enum is shared across the workspace so the node and proxy
//! front-ends can map every failure onto its wire form in one place.
//!
//! ## Error Categories
//!
//! - **WrongType / InvalidArgument**: the request is malformed for the
//!   current state; fix the request, never retry.
//! - **Capacity**: a configured limit was exceeded; the operation did not
//!   take effect.
//! - **Durability**: WAL append or fsync failed; the operation did not take
//!   effect.
//! - **Corruption**: integrity check failed on persisted state. Fatal at
//!   startup, logged-and-truncated during WAL replay.
//! - **Protocol**: malformed RESP frame from a client or a backend.
//! - **NoAvailableNodes / NodeUnhealthy / Backend**: routing-side failures
//!   surfaced by the proxy.

use std::io;
use thiserror::Error;

/// Result type alias for CacheGrid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared across the CacheGrid workspace
#[derive(Debug, Error)]
pub enum Error {
    /// Operation against a key holding the wrong value kind
    #[error("WRONGTYPE operation against a key holding the wrong kind of value (expected {expected}, found {actual})")]
    WrongType {
        /// Value kind the operation requires
        expected: &'static str,
        /// Value kind actually stored under the key
        actual: &'static str,
    },

    /// Invalid argument (bad integer, bad score, bad flag combination)
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What is wrong with the input
        message: String,
    },

    /// A configured capacity limit was exceeded
    #[error("capacity exceeded: {resource} (limit: {limit}, requested: {requested})")]
    Capacity {
        /// Which resource hit its limit
        resource: String,
        /// The configured limit
        limit: u64,
        /// What was requested
        requested: u64,
    },

    /// WAL append or fsync failed; the mutation did not take effect
    #[error("durability failure: {message}")]
    Durability {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Persisted state failed an integrity check
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    /// Failed to serialize or deserialize persisted data
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Malformed wire frame
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the framing problem
        message: String,
    },

    /// The consistent-hash ring has no members
    #[error("no available nodes")]
    NoAvailableNodes,

    /// The routed node is unhealthy or unknown-stale
    #[error("node unhealthy: {node_id}")]
    NodeUnhealthy {
        /// Identity of the gated node
        node_id: String,
    },

    /// Transport failure or reply parse failure talking to a backend node
    #[error("backend communication failed: {detail}")]
    Backend {
        /// Transport-level detail
        detail: String,
    },

    /// I/O error (file operations, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            message: e.to_string(),
        }
    }
}

impl Error {
    /// Create a WrongType error
    pub fn wrong_type(expected: &'static str, actual: &'static str) -> Self {
        Error::WrongType { expected, actual }
    }

    /// Create an InvalidArgument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a Capacity error
    pub fn capacity(resource: impl Into<String>, limit: u64, requested: u64) -> Self {
        Error::Capacity {
            resource: resource.into(),
            limit,
            requested,
        }
    }

    /// Create a Durability error
    pub fn durability(message: impl Into<String>) -> Self {
        Error::Durability {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Durability error wrapping an underlying cause
    pub fn durability_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Durability {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a Corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create a Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Create a Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Create a NodeUnhealthy error
    pub fn node_unhealthy(node_id: impl Into<String>) -> Self {
        Error::NodeUnhealthy {
            node_id: node_id.into(),
        }
    }

    /// Create a Backend error
    pub fn backend(detail: impl Into<String>) -> Self {
        Error::Backend {
            detail: detail.into(),
        }
    }

    /// Check if this is a WRONGTYPE error (maps to `-WRONGTYPE` on the wire)
    pub fn is_wrong_type(&self) -> bool {
        matches!(self, Error::WrongType { .. })
    }

    /// Check if this is a durability failure
    pub fn is_durability(&self) -> bool {
        matches!(self, Error::Durability { .. })
    }

    /// Check if this error indicates corrupted persisted state
    ///
    /// Corruption found at startup (snapshot header, unreadable data dir)
    /// aborts the process; corruption found mid-WAL is truncated and logged.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }
}
