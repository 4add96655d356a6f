//! TCP front-end
//!
//! One accept loop; each connection is serviced by its own task. Commands
//! on a connection are handled sequentially, so replies leave in request
//! order no matter which shards they touched.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use cachegrid_wire::{encode_reply, parse_command, Reply};

use crate::dispatcher::dispatch;
use crate::engine::Engine;

/// Accept connections until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
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
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, engine).await {
                        tracing::debug!(%peer, error = %err, "connection ended with error");
                    }
                });
            }
        }
    }
    tracing::info!("accept loop stopped");
    Ok(())
}

/// Service a single client connection.
pub async fn handle_connection(
    mut stream: TcpStream,
    engine: Arc<Engine>,
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
                    let reply = dispatch(&engine, &args);
                    out.clear();
                    encode_reply(&reply, &mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(err) => {
                    // Typed error, connection stays open. The buffered
                    // bytes are unframeable garbage, so drop them and
                    // resync at the next read.
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
