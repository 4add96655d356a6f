//! Proxy front-end
//!
//! Parses client frames, routes keyed commands through the health gate
//! and the ring to exactly one backend, and forwards replies verbatim —
//! a node's error keeps its `-` form, a transport failure becomes
//! `-ERR backend communication failed: <detail>`. Keyless commands
//! (FLUSH, KEYS, SIZE) fan out to every member and fan the results back
//! in; CLUSTER and INFO are answered locally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use cachegrid_core::NodeSpec;
use cachegrid_wire::{encode_command, encode_reply, parse_command, Reply};

use crate::backend::BackendPool;
use crate::config::ProxyConfig;
use crate::health_cache::HealthCache;
use crate::ring::Router;

#[derive(Default)]
struct ProxyStats {
    commands: AtomicU64,
    errors: AtomicU64,
    forwarded: DashMap<String, u64>,
}

/// Shared state of one proxy process.
pub struct ProxyState {
    proxy_id: String,
    nodes: Vec<NodeSpec>,
    router: Router,
    pool: BackendPool,
    health: HealthCache,
    stats: ProxyStats,
    started: Instant,
}

impl ProxyState {
    /// Build the proxy state from its configuration.
    pub fn new(config: &ProxyConfig) -> ProxyState {
        let node_ids: Vec<String> = config.nodes.iter().map(|n| n.id.clone()).collect();
        ProxyState {
            proxy_id: config.proxy_id.clone(),
            nodes: config.nodes.clone(),
            router: Router::new(&node_ids, config.vnodes),
            pool: BackendPool::new(&config.nodes, config.backend_timeout),
            health: HealthCache::new(config.health_service.clone(), config.stale_after()),
            stats: ProxyStats::default(),
            started: Instant::now(),
        }
    }

    /// The health cache (the poll loop runs against it).
    pub fn health(&self) -> &HealthCache {
        &self.health
    }

    /// The ring router.
    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Accept client connections until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        tracing::debug!(%peer, error = %err, "client connection ended with error");
                    }
                });
            }
        }
    }
    tracing::info!("accept loop stopped");
    Ok(())
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ProxyState>,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = Vec::with_capacity(256);

    loop {
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            break;
        }

        loop {
            match parse_command(&mut buffer) {
                Ok(Some(args)) => {
                    if args.is_empty() {
                        continue;
                    }
                    let reply = handle_command(&state, &args).await;
                    out.clear();
                    encode_reply(&reply, &mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(err) => {
                    out.clear();
                    encode_reply(&Reply::Error(format!("ERR {err}")), &mut out);
                    stream.write_all(&out).await?;
                    buffer.clear();
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Execute one client command.
pub async fn handle_command(state: &ProxyState, args: &[Vec<u8>]) -> Reply {
    if args.is_empty() {
        return Reply::err("empty command");
    }
    state.stats.commands.fetch_add(1, Ordering::Relaxed);
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    let reply = match name.as_str() {
        "PING" => match args.len() {
            1 => Reply::pong(),
            2 => Reply::Bulk(args[1].clone()),
            _ => Reply::err("wrong number of arguments for 'ping' command"),
        },
        "CLUSTER" => cluster(state, args),
        "INFO" | "STATS" => Reply::Bulk(proxy_info(state).into_bytes()),
        "FLUSH" => fan_out_flush(state).await,
        "KEYS" => fan_out_keys(state, args).await,
        "SIZE" => fan_out_size(state).await,
        "SET" | "GET" | "DEL" | "EXISTS" | "EXPIRE" | "TTL" | "ZADD" | "ZREM" | "ZSCORE"
        | "ZRANK" | "ZREVRANK" | "ZRANGE" | "ZREVRANGE" | "ZCARD" => {
            if args.len() < 2 {
                Reply::Error(format!(
                    "ERR wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                ))
            } else {
                route(state, args).await
            }
        }
        _ => Reply::Error(format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    };

    if matches!(reply, Reply::Error(_)) {
        state.stats.errors.fetch_add(1, Ordering::Relaxed);
    }
    reply
}

/// Route a keyed command to the node owning `args[1]`.
async fn route(state: &ProxyState, args: &[Vec<u8>]) -> Reply {
    let node = match state.router.lookup(&args[1]) {
        Ok(node) => node,
        Err(_) => return Reply::err("no available nodes"),
    };
    if state.health.gate(&node).is_err() {
        return Reply::err("node unhealthy");
    }
    forward(state, &node, args).await
}

/// Forward a command to a specific node, counting the outcome.
async fn forward(state: &ProxyState, node: &str, args: &[Vec<u8>]) -> Reply {
    let borrowed: Vec<&[u8]> = args.iter().map(|a| a.as_slice()).collect();
    let mut frame = Vec::new();
    encode_command(&borrowed, &mut frame);

    match state.pool.request(node, &frame).await {
        Ok(reply) => {
            *state.stats.forwarded.entry(node.to_string()).or_insert(0) += 1;
            reply
        }
        Err(err) => Reply::Error(format!("ERR {err}")),
    }
}

/// Every ring member, or an error when the ring is empty or a member is
/// gated. Fan-out commands refuse to run partially.
fn gated_members(state: &ProxyState) -> Result<Vec<String>, Reply> {
    let ring = state.router.current();
    if ring.is_empty() {
        return Err(Reply::err("no available nodes"));
    }
    for node in ring.nodes() {
        if state.health.gate(node).is_err() {
            return Err(Reply::err("node unhealthy"));
        }
    }
    Ok(ring.nodes().to_vec())
}

async fn fan_out_flush(state: &ProxyState) -> Reply {
    let members = match gated_members(state) {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    for node in &members {
        match forward(state, node, &[b"FLUSH".to_vec()]).await {
            Reply::Simple(_) => {}
            other => return other,
        }
    }
    Reply::ok()
}

async fn fan_out_keys(state: &ProxyState, args: &[Vec<u8>]) -> Reply {
    if args.len() > 2 {
        return Reply::err("wrong number of arguments for 'keys' command");
    }
    let members = match gated_members(state) {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    let mut keys = Vec::new();
    for node in &members {
        match forward(state, node, args).await {
            Reply::Array(items) => {
                for item in items {
                    match item {
                        Reply::Bulk(key) => keys.push(key),
                        other => return Reply::err(format!("unexpected KEYS element {other:?}")),
                    }
                }
            }
            other => return other,
        }
    }
    keys.sort();
    Reply::Array(keys.into_iter().map(Reply::Bulk).collect())
}

async fn fan_out_size(state: &ProxyState) -> Reply {
    let members = match gated_members(state) {
        Ok(members) => members,
        Err(reply) => return reply,
    };
    let mut total = 0i64;
    for node in &members {
        match forward(state, node, &[b"SIZE".to_vec()]).await {
            Reply::Integer(n) => total += n,
            other => return other,
        }
    }
    Reply::Integer(total)
}

fn cluster(state: &ProxyState, args: &[Vec<u8>]) -> Reply {
    if args.len() != 2 {
        return Reply::err("wrong number of arguments for 'cluster' command");
    }
    let sub = String::from_utf8_lossy(&args[1]).to_ascii_uppercase();
    match sub.as_str() {
        "INFO" => Reply::Bulk(cluster_info(state).into_bytes()),
        "NODES" => Reply::Bulk(cluster_nodes(state).into_bytes()),
        "STATS" => Reply::Bulk(proxy_info(state).into_bytes()),
        _ => Reply::err(format!("unknown CLUSTER subcommand '{sub}'")),
    }
}

fn cluster_info(state: &ProxyState) -> String {
    let ring = state.router.current();
    let (healthy, unhealthy) = state.health.counts();
    let mut out = String::new();
    out.push_str(&format!("cluster_nodes:{}\r\n", ring.len()));
    out.push_str(&format!("cluster_vnodes_per_node:{}\r\n", ring.vnodes()));
    out.push_str(&format!("cluster_healthy:{healthy}\r\n"));
    out.push_str(&format!("cluster_unhealthy:{unhealthy}\r\n"));
    out
}

fn cluster_nodes(state: &ProxyState) -> String {
    let mut out = String::new();
    for node in &state.nodes {
        let status = format!("{:?}", state.health.status(&node.id)).to_uppercase();
        out.push_str(&format!("{} {} {}\r\n", node.id, node.addr(), status));
    }
    out
}

fn proxy_info(state: &ProxyState) -> String {
    let mut out = String::new();
    out.push_str("# proxy\r\n");
    out.push_str(&format!("proxy_id:{}\r\n", state.proxy_id));
    out.push_str(&format!(
        "uptime_seconds:{}\r\n",
        state.started.elapsed().as_secs()
    ));
    out.push_str("# routing\r\n");
    out.push_str(&format!(
        "commands:{}\r\n",
        state.stats.commands.load(Ordering::Relaxed)
    ));
    out.push_str(&format!(
        "errors:{}\r\n",
        state.stats.errors.load(Ordering::Relaxed)
    ));
    let mut forwarded: Vec<(String, u64)> = state
        .stats
        .forwarded
        .iter()
        .map(|e| (e.key().clone(), *e.value()))
        .collect();
    forwarded.sort();
    for (node, count) in forwarded {
        out.push_str(&format!("forwarded_{node}:{count}\r\n"));
    }
    out
}
