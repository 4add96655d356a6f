//! End-to-end tests over a real socket: raw RESP in, raw RESP out.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use cachegrid_node::{server, Engine, NodeConfig};
use cachegrid_wire::{encode_command, parse_reply, Reply};

struct TestNode {
    addr: std::net::SocketAddr,
    stop: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

async fn start_node() -> TestNode {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        persistence: true,
        ..NodeConfig::default()
    };
    let engine = Arc::new(Engine::open(&config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(server::serve(listener, engine, stop_rx));

    TestNode {
        addr,
        stop: stop_tx,
        _dir: dir,
    }
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
        self.send_raw(&frame).await
    }

    async fn send_raw(&mut self, frame: &[u8]) -> Reply {
        self.stream.write_all(frame).await.unwrap();
        loop {
            if let Some(reply) = parse_reply(&mut self.buf).unwrap() {
                return reply;
            }
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(read > 0, "server closed connection mid-reply");
        }
    }
}

#[tokio::test]
async fn ping_and_probe_frames() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    assert_eq!(client.exec(&[b"PING"]).await, Reply::pong());
    // The literal health-probe frame.
    assert_eq!(
        client.send_raw(b"*1\r\n$4\r\nPING\r\n").await,
        Reply::pong()
    );
    // The short inline probe form.
    assert_eq!(client.send_raw(b"PING\r\n").await, Reply::pong());

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn set_get_ttl_flow() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    assert_eq!(client.exec(&[b"SET", b"user:1", b"Alice"]).await, Reply::ok());
    assert_eq!(
        client.exec(&[b"GET", b"user:1"]).await,
        Reply::Bulk(b"Alice".to_vec())
    );

    assert_eq!(
        client.exec(&[b"SET", b"s", b"active", b"EX", b"1"]).await,
        Reply::ok()
    );
    assert_eq!(client.exec(&[b"TTL", b"s"]).await, Reply::Integer(1));

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    assert_eq!(client.exec(&[b"GET", b"s"]).await, Reply::Null);
    assert_eq!(client.exec(&[b"TTL", b"s"]).await, Reply::Integer(-2));

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn sorted_set_ranking_over_the_wire() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    client.exec(&[b"ZADD", b"lb", b"100", b"p1"]).await;
    client.exec(&[b"ZADD", b"lb", b"120", b"p3"]).await;
    client.exec(&[b"ZADD", b"lb", b"85.5", b"p2"]).await;

    assert_eq!(
        client.exec(&[b"ZREVRANGE", b"lb", b"0", b"0"]).await,
        Reply::Array(vec![Reply::Bulk(b"p3".to_vec())])
    );
    assert_eq!(client.exec(&[b"ZRANK", b"lb", b"p1"]).await, Reply::Integer(1));
    assert_eq!(
        client.exec(&[b"ZRANGE", b"lb", b"0", b"-1"]).await,
        Reply::Array(vec![
            Reply::Bulk(b"p2".to_vec()),
            Reply::Bulk(b"p1".to_vec()),
            Reply::Bulk(b"p3".to_vec()),
        ])
    );

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn protocol_error_keeps_connection_usable() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    let reply = client.send_raw(b"*1\r\n:42\r\n").await;
    match reply {
        Reply::Error(msg) => assert!(msg.contains("protocol error")),
        other => panic!("expected protocol error, got {other:?}"),
    }

    // Same connection still serves commands.
    assert_eq!(client.exec(&[b"PING"]).await, Reply::pong());

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn unknown_command_is_an_error_value() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    match client.exec(&[b"WHATEVER"]).await {
        Reply::Error(msg) => assert!(msg.starts_with("ERR unknown command")),
        other => panic!("expected error, got {other:?}"),
    }

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let node = start_node().await;
    let mut client = Client::connect(node.addr).await;

    // Write three commands in one burst, then read three replies.
    let mut burst = Vec::new();
    encode_command(&[b"SET", b"a", b"1"], &mut burst);
    encode_command(&[b"SET", b"b", b"2"], &mut burst);
    encode_command(&[b"GET", b"a"], &mut burst);
    client.stream.write_all(&burst).await.unwrap();

    let mut replies = Vec::new();
    while replies.len() < 3 {
        if let Some(reply) = parse_reply(&mut client.buf).unwrap() {
            replies.push(reply);
            continue;
        }
        let read = client.stream.read_buf(&mut client.buf).await.unwrap();
        assert!(read > 0);
    }
    assert_eq!(
        replies,
        vec![Reply::ok(), Reply::ok(), Reply::Bulk(b"1".to_vec())]
    );

    let _ = node.stop.send(true);
}

#[tokio::test]
async fn concurrent_clients_do_not_interfere() {
    let node = start_node().await;

    let mut tasks = Vec::new();
    for client_id in 0..8 {
        let addr = node.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            for i in 0..50 {
                let key = format!("c{client_id}:k{i}");
                let value = format!("v{client_id}:{i}");
                assert_eq!(
                    client.exec(&[b"SET", key.as_bytes(), value.as_bytes()]).await,
                    Reply::ok()
                );
                assert_eq!(
                    client.exec(&[b"GET", key.as_bytes()]).await,
                    Reply::Bulk(value.into_bytes())
                );
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = Client::connect(node.addr).await;
    assert_eq!(client.exec(&[b"SIZE"]).await, Reply::Integer(400));

    let _ = node.stop.send(true);
}
