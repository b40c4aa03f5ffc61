// src/server/mod.rs

//! Binds the binary TCP listener data nodes connect to for the handshake,
//! and wires the manager's collaborators together at startup.

pub mod handshake;
pub mod metrics_server;

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::core::manager::SyncManager;
use crate::core::rpc::{DataNodeFrameCodec, Opcode};
use tokio_util::codec::Framed;

/// Accepts handshake connections on `bind_address` until `shutdown` fires.
/// Each connection is expected to send exactly one `HSHK` frame and receive
/// exactly one reply before closing, mirroring the original data node's
/// handshake-then-listen startup sequence.
pub async fn run(
    bind_address: &str,
    manager: Arc<SyncManager>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    info!(bind_address, "manager handshake listener started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("handshake listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept handshake connection");
                        continue;
                    }
                };
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &manager).await {
                        warn!(peer = %peer, error = %e, "handshake connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, manager: &Arc<SyncManager>) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, DataNodeFrameCodec);
    let frame = match framed.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(e.into()),
        None => return Ok(()),
    };

    if frame.opcode != Opcode::Handshake {
        warn!(opcode = ?frame.opcode, "expected HSHK as first frame, dropping connection");
        return Ok(());
    }

    let request = handshake::decode_handshake_request(frame.payload)?;
    let reply = handshake::handle_handshake(manager, request).await?;
    framed.send(reply).await?;
    Ok(())
}
