// src/core/rpc/client.rs

//! Node RPC client cache: reuses authenticated sessions to data-node
//! endpoints, keyed by `nodeId` (not address — addresses may change).
//!
//! Grounded on `ClusterClient` (a `TcpStream` + frame codec wrapper with
//! connect/write/read timeouts) and `WardenClient`. On I/O error the cache
//! entry is evicted and reconnection is lazy on the next `get()`.
//!
//! This resolves the node-cache keying ambiguity noted in the design notes:
//! both insertion and lookup use `nodeId` consistently.

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use super::protocol::{DataNodeFrameCodec, Frame, Opcode, Status};
use crate::core::errors::SyncError;
use crate::core::registry::NodeId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One bidirectional session to a data node's command port. The single
/// implementation the core ships; tests substitute a fake behind the trait.
#[async_trait]
pub trait DataNodeClient: Send + Sync {
    async fn sync_create(&self, sha: &str, source_address: &str) -> Result<Status, SyncError>;
    async fn sync_delete(&self, sha: &str) -> Result<Status, SyncError>;
    async fn hash_list(&self) -> Result<Vec<String>, SyncError>;
    async fn handshake(
        &self,
        hw_addr: [u8; 6],
        bind_address: &str,
        size: u64,
    ) -> Result<HandshakeReply, SyncError>;
    async fn promote_master(&self) -> Result<Status, SyncError>;
    async fn demote_to_slave(&self, master_address: &str) -> Result<Status, SyncError>;
}

#[derive(Debug, Clone)]
pub struct HandshakeReply {
    pub cluster_id: String,
    pub node_id: String,
    pub master_address: String,
}

/// TCP-backed `DataNodeClient`. Lazily connects on first use; the connection
/// is stored behind a mutex so one client instance serializes its own
/// traffic while distinct nodes are reached concurrently.
pub struct TcpDataNodeClient {
    address: String,
    conn: Mutex<Option<Framed<TcpStream, DataNodeFrameCodec>>>,
}

impl TcpDataNodeClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            conn: Mutex::new(None),
        }
    }

    async fn ensure_connected<'a>(
        &self,
        guard: &mut tokio::sync::MutexGuard<'a, Option<Framed<TcpStream, DataNodeFrameCodec>>>,
    ) -> Result<(), SyncError> {
        if guard.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SyncError::NodeUnreachable(self.address.clone()))??;
        **guard = Some(Framed::new(stream, DataNodeFrameCodec));
        Ok(())
    }

    async fn call(&self, opcode: Opcode, payload: BytesMut) -> Result<Frame, SyncError> {
        let mut guard = self.conn.lock().await;
        if self.ensure_connected(&mut guard).await.is_err() {
            return Err(SyncError::NodeUnreachable(self.address.clone()));
        }
        let framed = guard.as_mut().expect("just connected");
        let request = Frame::new(opcode, payload);

        let result: Result<Frame, SyncError> = async {
            tokio::time::timeout(CALL_TIMEOUT, framed.send(request))
                .await
                .map_err(|_| SyncError::RpcTimeout {
                    node: self.address.clone(),
                    timeout_ms: CALL_TIMEOUT.as_millis() as u64,
                })??;
            let reply = tokio::time::timeout(CALL_TIMEOUT, framed.next())
                .await
                .map_err(|_| SyncError::RpcTimeout {
                    node: self.address.clone(),
                    timeout_ms: CALL_TIMEOUT.as_millis() as u64,
                })?
                .ok_or_else(|| SyncError::NodeUnreachable(self.address.clone()))??;
            Ok(reply)
        }
        .await;

        if result.is_err() {
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl DataNodeClient for TcpDataNodeClient {
    async fn sync_create(&self, sha: &str, source_address: &str) -> Result<Status, SyncError> {
        let mut payload = BytesMut::with_capacity(64 + 2 + source_address.len());
        payload.put_slice(sha.as_bytes());
        payload.put_u16(source_address.len() as u16);
        payload.put_slice(source_address.as_bytes());
        let reply = self.call(Opcode::SyncCreate, payload).await?;
        Ok(Status::from_byte(*reply.payload.first().unwrap_or(&0xFF)))
    }

    async fn sync_delete(&self, sha: &str) -> Result<Status, SyncError> {
        let mut payload = BytesMut::with_capacity(64);
        payload.put_slice(sha.as_bytes());
        let reply = self.call(Opcode::SyncDelete, payload).await?;
        Ok(Status::from_byte(*reply.payload.first().unwrap_or(&0xFF)))
    }

    async fn hash_list(&self) -> Result<Vec<String>, SyncError> {
        let reply = self.call(Opcode::HashList, BytesMut::new()).await?;
        let mut buf = reply.payload;
        if buf.len() < 4 {
            return Err(SyncError::Protocol("truncated hash list".into()));
        }
        let count = buf.get_u32() as usize;
        let mut shas = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.len() < 128 {
                return Err(SyncError::Protocol("truncated hash list entry".into()));
            }
            let sha = String::from_utf8_lossy(&buf.split_to(128)).into_owned();
            shas.push(sha);
        }
        Ok(shas)
    }

    async fn handshake(
        &self,
        hw_addr: [u8; 6],
        bind_address: &str,
        size: u64,
    ) -> Result<HandshakeReply, SyncError> {
        let mut payload = BytesMut::with_capacity(6 + 2 + bind_address.len() + 8);
        payload.put_slice(&hw_addr);
        payload.put_u16(bind_address.len() as u16);
        payload.put_slice(bind_address.as_bytes());
        payload.put_u64(size);
        let reply = self.call(Opcode::Handshake, payload).await?;
        let mut buf = reply.payload;
        if buf.len() < 72 {
            return Err(SyncError::Protocol("truncated handshake reply".into()));
        }
        let cluster_id = String::from_utf8_lossy(&buf.split_to(36)).into_owned();
        let node_id = String::from_utf8_lossy(&buf.split_to(36)).into_owned();
        let master_address = String::from_utf8_lossy(&buf).into_owned();
        Ok(HandshakeReply {
            cluster_id,
            node_id,
            master_address,
        })
    }

    async fn promote_master(&self) -> Result<Status, SyncError> {
        let reply = self.call(Opcode::PromoteMaster, BytesMut::new()).await?;
        Ok(Status::from_byte(*reply.payload.first().unwrap_or(&0xFF)))
    }

    async fn demote_to_slave(&self, master_address: &str) -> Result<Status, SyncError> {
        let mut payload = BytesMut::with_capacity(2 + master_address.len());
        payload.put_u16(master_address.len() as u16);
        payload.put_slice(master_address.as_bytes());
        let reply = self.call(Opcode::DemoteToSlave, payload).await?;
        Ok(Status::from_byte(*reply.payload.first().unwrap_or(&0xFF)))
    }
}

/// Factory used by the cache to build a fresh client for a node's current
/// address. Swappable in tests to produce fakes instead of TCP clients.
pub type ClientFactory = Arc<dyn Fn(&str) -> Arc<dyn DataNodeClient> + Send + Sync>;

/// Cache of live sessions, keyed by `nodeId`, with an at-most-one-live-session
/// contract per node.
pub struct NodeRpcCache {
    sessions: DashMap<NodeId, Arc<dyn DataNodeClient>>,
    factory: ClientFactory,
}

impl NodeRpcCache {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
        }
    }

    pub fn with_tcp_factory() -> Self {
        Self::new(Arc::new(|addr: &str| {
            Arc::new(TcpDataNodeClient::new(addr.to_string())) as Arc<dyn DataNodeClient>
        }))
    }

    /// Returns the cached session for `node_id`, creating one bound to
    /// `address` if absent.
    pub fn get(&self, node_id: &str, address: &str) -> Arc<dyn DataNodeClient> {
        self.sessions
            .entry(node_id.to_string())
            .or_insert_with(|| (self.factory)(address))
            .clone()
    }

    /// Evicts the cached session for `node_id`, forcing a fresh connection
    /// on the next `get()`.
    pub fn evict(&self, node_id: &str) {
        self.sessions.remove(node_id);
    }
}
