//! Proxy end-to-end: real nodes, real health service, real gate.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use cachegrid_core::NodeSpec;
use cachegrid_health::{http, HealthChecker, HealthRegistry};
use cachegrid_node::{server as node_server, Engine, NodeConfig};
use cachegrid_proxy::{server as proxy_server, ProxyConfig, ProxyState};
use cachegrid_wire::{encode_command, parse_reply, Reply};

/// A cluster of one live node, one dead node, a health service that has
/// already probed both, and a proxy in front.
struct Cluster {
    proxy_addr: std::net::SocketAddr,
    live_node: String,
    dead_node: String,
    state: Arc<ProxyState>,
    _stop: watch::Sender<bool>,
    _dirs: Vec<tempfile::TempDir>,
}

async fn start_cluster() -> Cluster {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut dirs = Vec::new();

    // Live storage node.
    let live_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let live_addr = live_listener.local_addr().unwrap();
    {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            persistence: false,
            ..NodeConfig::default()
        };
        let engine = Arc::new(Engine::open(&config).unwrap());
        tokio::spawn(node_server::serve(live_listener, engine, stop_rx.clone()));
        dirs.push(dir);
    }

    // Dead storage node: a bound-then-dropped port.
    let dead_addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let nodes = vec![
        NodeSpec {
            id: "n-live".to_string(),
            host: live_addr.ip().to_string(),
            port: live_addr.port(),
        },
        NodeSpec {
            id: "n-dead".to_string(),
            host: dead_addr.ip().to_string(),
            port: dead_addr.port(),
        },
    ];

    // Health service: registry + checker + HTTP.
    let registry = Arc::new(HealthRegistry::new(2));
    for node in &nodes {
        registry.register(node);
    }
    let checker = HealthChecker::new(
        Arc::clone(&registry),
        Duration::from_secs(30),
        Duration::from_millis(500),
    );
    // Two probe rounds so the dead node crosses the failure threshold.
    checker.check_all().await;
    checker.check_all().await;

    let health_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let health_addr = health_listener.local_addr().unwrap();
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            axum::serve(health_listener, http::router(registry))
                .await
                .unwrap();
        });
    }

    // Proxy.
    let config = ProxyConfig {
        nodes,
        health_service: format!("http://{health_addr}"),
        check_interval: Duration::from_secs(30),
        backend_timeout: Duration::from_secs(1),
        ..ProxyConfig::default()
    };
    let state = Arc::new(ProxyState::new(&config));
    state.health().refresh().await.unwrap();

    let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    tokio::spawn(proxy_server::serve(
        proxy_listener,
        Arc::clone(&state),
        stop_rx,
    ));

    Cluster {
        proxy_addr,
        live_node: "n-live".to_string(),
        dead_node: "n-dead".to_string(),
        state,
        _stop: stop_tx,
        _dirs: dirs,
    }
}

/// Find a key the ring assigns to `node`.
fn key_owned_by(state: &ProxyState, node: &str) -> Vec<u8> {
    for i in 0..100_000 {
        let key = format!("probe-key-{i}").into_bytes();
        if state.router().lookup(&key).unwrap() == node {
            return key;
        }
    }
    panic!("no key found for node {node}");
}

struct Client {
    stream: TcpStream,
    buf: BytesMut,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Client {
        Client {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::with_capacity(4096),
        }
    }

    async fn exec(&mut self, args: &[&[u8]]) -> Reply {
        let mut frame = Vec::new();
        encode_command(args, &mut frame);
        self.stream.write_all(&frame).await.unwrap();
        loop {
            if let Some(reply) = parse_reply(&mut self.buf).unwrap() {
                return reply;
            }
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(read > 0, "proxy closed connection mid-reply");
        }
    }
}

#[tokio::test]
async fn routes_to_live_node_and_round_trips() {
    let cluster = start_cluster().await;
    let key = key_owned_by(&cluster.state, &cluster.live_node);
    let mut client = Client::connect(cluster.proxy_addr).await;

    assert_eq!(client.exec(&[b"SET", &key, b"Alice"]).await, Reply::ok());
    assert_eq!(
        client.exec(&[b"GET", &key]).await,
        Reply::Bulk(b"Alice".to_vec())
    );
}

#[tokio::test]
async fn gates_commands_for_the_dead_node() {
    let cluster = start_cluster().await;
    let key = key_owned_by(&cluster.state, &cluster.dead_node);
    let mut client = Client::connect(cluster.proxy_addr).await;

    match client.exec(&[b"GET", &key]).await {
        Reply::Error(msg) => assert_eq!(msg, "ERR node unhealthy"),
        other => panic!("expected gate error, got {other:?}"),
    }

    // The live node keeps serving on the same connection.
    let live_key = key_owned_by(&cluster.state, &cluster.live_node);
    assert_eq!(client.exec(&[b"SET", &live_key, b"v"]).await, Reply::ok());
}

#[tokio::test]
async fn node_errors_are_forwarded_verbatim() {
    let cluster = start_cluster().await;
    let key = key_owned_by(&cluster.state, &cluster.live_node);
    let mut client = Client::connect(cluster.proxy_addr).await;

    client.exec(&[b"ZADD", &key, b"10", b"m"]).await;
    match client.exec(&[b"GET", &key]).await {
        Reply::Error(msg) => assert!(msg.starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE from node, got {other:?}"),
    }
}

#[tokio::test]
async fn proxy_answers_ping_and_cluster_locally() {
    let cluster = start_cluster().await;
    let mut client = Client::connect(cluster.proxy_addr).await;

    assert_eq!(client.exec(&[b"PING"]).await, Reply::pong());

    match client.exec(&[b"CLUSTER", b"INFO"]).await {
        Reply::Bulk(text) => {
            let text = String::from_utf8(text).unwrap();
            assert!(text.contains("cluster_nodes:2"));
            assert!(text.contains("cluster_healthy:1"));
            assert!(text.contains("cluster_unhealthy:1"));
        }
        other => panic!("expected bulk, got {other:?}"),
    }

    match client.exec(&[b"CLUSTER", b"NODES"]).await {
        Reply::Bulk(text) => {
            let text = String::from_utf8(text).unwrap();
            assert!(text.contains("n-live"));
            assert!(text.contains("UNHEALTHY"));
        }
        other => panic!("expected bulk, got {other:?}"),
    }
}

#[tokio::test]
async fn fan_out_refuses_with_a_dead_member() {
    let cluster = start_cluster().await;
    let mut client = Client::connect(cluster.proxy_addr).await;

    // One member is unhealthy, so a cluster-wide FLUSH must not run
    // partially.
    match client.exec(&[b"FLUSH"]).await {
        Reply::Error(msg) => assert_eq!(msg, "ERR node unhealthy"),
        other => panic!("expected gate error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_commands_fail_at_the_proxy() {
    let cluster = start_cluster().await;
    let mut client = Client::connect(cluster.proxy_addr).await;
    match client.exec(&[b"MULTI"]).await {
        Reply::Error(msg) => assert!(msg.starts_with("ERR unknown command")),
        other => panic!("expected error, got {other:?}"),
    }
}
