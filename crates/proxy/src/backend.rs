//! Backend connection pool
//!
//! One long-lived TCP connection per node, with a single in-flight
//! request at a time (the per-connection mutex doubles as the request
//! serializer, which preserves reply ordering). A broken connection is
//! re-dialed with capped exponential backoff: 100 ms doubling to 5 s,
//! retrying forever — but a request that arrives inside the backoff
//! window fails fast instead of stalling the client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use cachegrid_core::{Error, NodeSpec, Result};
use cachegrid_wire::{parse_reply, Reply};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

struct Conn {
    stream: TcpStream,
    buf: BytesMut,
}

struct BackendState {
    conn: Option<Conn>,
    backoff: Duration,
    retry_at: Option<Instant>,
}

/// One node's connection slot.
pub struct Backend {
    addr: String,
    state: Mutex<BackendState>,
}

impl Backend {
    fn new(addr: String) -> Backend {
        Backend {
            addr,
            state: Mutex::new(BackendState {
                conn: None,
                backoff: INITIAL_BACKOFF,
                retry_at: None,
            }),
        }
    }

    /// Send one framed command and read one reply.
    async fn request(&self, frame: &[u8], timeout: Duration) -> Result<Reply> {
        let mut state = self.state.lock().await;

        if state.conn.is_none() {
            if let Some(retry_at) = state.retry_at {
                if Instant::now() < retry_at {
                    return Err(Error::backend(format!(
                        "{} unavailable, reconnect backoff active",
                        self.addr
                    )));
                }
            }
            match tokio::time::timeout(timeout, TcpStream::connect(&self.addr)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!(addr = %self.addr, "backend connected");
                    state.conn = Some(Conn {
                        stream,
                        buf: BytesMut::with_capacity(4096),
                    });
                    state.backoff = INITIAL_BACKOFF;
                    state.retry_at = None;
                }
                Ok(Err(err)) => {
                    self.schedule_retry(&mut state);
                    return Err(Error::backend(format!("connect {}: {err}", self.addr)));
                }
                Err(_) => {
                    self.schedule_retry(&mut state);
                    return Err(Error::backend(format!("connect {}: timed out", self.addr)));
                }
            }
        }

        let Some(conn) = state.conn.as_mut() else {
            return Err(Error::backend(format!("{} not connected", self.addr)));
        };
        match tokio::time::timeout(timeout, round_trip(conn, frame)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                state.conn = None;
                self.schedule_retry(&mut state);
                Err(Error::backend(format!("{}: {err}", self.addr)))
            }
            Err(_) => {
                state.conn = None;
                self.schedule_retry(&mut state);
                Err(Error::backend(format!(
                    "{}: request timed out after {timeout:?}",
                    self.addr
                )))
            }
        }
    }

    fn schedule_retry(&self, state: &mut BackendState) {
        state.retry_at = Some(Instant::now() + state.backoff);
        tracing::info!(
            addr = %self.addr,
            backoff_ms = state.backoff.as_millis() as u64,
            "backend unavailable, backing off"
        );
        state.backoff = (state.backoff * 2).min(MAX_BACKOFF);
    }
}

async fn round_trip(conn: &mut Conn, frame: &[u8]) -> std::result::Result<Reply, String> {
    conn.stream
        .write_all(frame)
        .await
        .map_err(|e| format!("write: {e}"))?;
    loop {
        match parse_reply(&mut conn.buf).map_err(|e| format!("reply parse: {e}"))? {
            Some(reply) => return Ok(reply),
            None => {
                let read = conn
                    .stream
                    .read_buf(&mut conn.buf)
                    .await
                    .map_err(|e| format!("read: {e}"))?;
                if read == 0 {
                    return Err("connection closed mid-reply".to_string());
                }
            }
        }
    }
}

/// Connection pool: one [`Backend`] per cluster node.
pub struct BackendPool {
    backends: HashMap<String, Arc<Backend>>,
    timeout: Duration,
}

impl BackendPool {
    /// Build the pool for a membership set.
    pub fn new(nodes: &[NodeSpec], timeout: Duration) -> BackendPool {
        let backends = nodes
            .iter()
            .map(|n| (n.id.clone(), Arc::new(Backend::new(n.addr()))))
            .collect();
        BackendPool { backends, timeout }
    }

    /// Forward a framed command to a node and return its reply.
    pub async fn request(&self, node_id: &str, frame: &[u8]) -> Result<Reply> {
        let backend = self
            .backends
            .get(node_id)
            .ok_or_else(|| Error::backend(format!("unknown node '{node_id}'")))?;
        backend.request(frame, self.timeout).await
    }

    /// Known node ids.
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }
}
