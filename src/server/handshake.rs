// src/server/handshake.rs

//! Handles inbound `HSHK` connections from data nodes: a node that starts up
//! connects to the manager's bind address, announces its hardware address,
//! advertised size, and command-port bind address, and receives back the
//! cluster it was assigned to, its stable node id, and the current master's
//! address.
//!
//! Grounded on `original_source/data-node/main.go`'s handshake-then-listen
//! startup sequence: node id is derived from the hardware address so it is
//! stable across restarts, matching `net.Interfaces()`-based id derivation
//! in the original.

use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::errors::SyncError;
use crate::core::manager::SyncManager;
use crate::core::registry::{Node, NodeRole};
use crate::core::rpc::{Frame, Opcode};

/// Every node that has not yet been assigned to an existing cluster with
/// spare capacity joins this one. A single manager in this deployment mode
/// owns exactly one cluster; multi-cluster placement policy belongs to the
/// head-node's chunk-placement layer and is out of scope for this core.
pub const DEFAULT_CLUSTER_ID: &str = "cluster-default";

pub fn derive_node_id(hw_addr: [u8; 6]) -> String {
    hex::encode(hw_addr)
}

/// Decodes a `HSHK` request frame's payload.
pub struct HandshakeRequest {
    pub hw_addr: [u8; 6],
    pub bind_address: String,
    pub size: u64,
}

pub fn decode_handshake_request(mut payload: BytesMut) -> Result<HandshakeRequest, SyncError> {
    if payload.len() < 6 + 2 {
        return Err(SyncError::Protocol("truncated handshake request".into()));
    }
    let mut hw_addr = [0u8; 6];
    hw_addr.copy_from_slice(&payload.split_to(6));
    if payload.len() < 2 {
        return Err(SyncError::Protocol("truncated handshake request".into()));
    }
    let bind_len = payload.get_u16() as usize;
    if payload.len() < bind_len + 8 {
        return Err(SyncError::Protocol("truncated handshake request".into()));
    }
    let bind_address = String::from_utf8_lossy(&payload.split_to(bind_len)).into_owned();
    let size = payload.get_u64();
    Ok(HandshakeRequest {
        hw_addr,
        bind_address,
        size,
    })
}

fn encode_handshake_reply(cluster_id: &str, node_id: &str, master_address: &str) -> Frame {
    let mut payload = BytesMut::with_capacity(36 + 36 + master_address.len());
    let mut cluster_field = [b' '; 36];
    let cluster_bytes = cluster_id.as_bytes();
    cluster_field[..cluster_bytes.len().min(36)]
        .copy_from_slice(&cluster_bytes[..cluster_bytes.len().min(36)]);
    let mut node_field = [b' '; 36];
    let node_bytes = node_id.as_bytes();
    node_field[..node_bytes.len().min(36)].copy_from_slice(&node_bytes[..node_bytes.len().min(36)]);
    payload.put_slice(&cluster_field);
    payload.put_slice(&node_field);
    payload.put_slice(master_address.as_bytes());
    Frame::new(Opcode::Handshake, payload)
}

/// Registers (or re-registers) a joining node and returns the reply frame to
/// send back on the wire. If the node becomes the cluster's first member it
/// is made master directly; otherwise it joins as slave and bootstrap is
/// triggered once registration completes.
pub async fn handle_handshake(
    manager: &Arc<SyncManager>,
    request: HandshakeRequest,
) -> Result<Frame, SyncError> {
    let node_id = derive_node_id(request.hw_addr);
    let cluster_id = DEFAULT_CLUSTER_ID;

    let existing = manager.registry.get_cluster(cluster_id).await;
    let is_first_node = match &existing {
        Ok(cluster) => cluster.nodes.is_empty(),
        Err(SyncError::ClusterNotFound(_)) => true,
        Err(e) => return Err(e.clone()),
    };

    if matches!(existing, Err(SyncError::ClusterNotFound(_))) {
        manager.registry.ensure_cluster(cluster_id).await?;
    }

    let mut node = Node::new(node_id.clone(), request.bind_address.clone(), request.size);
    if is_first_node {
        node.role = NodeRole::Master;
    }
    manager.registry.add_node(cluster_id, node).await?;
    manager
        .registry
        .update_node_liveness(cluster_id, &node_id, true, chrono::Utc::now())
        .await?;

    let master_address = if is_first_node {
        request.bind_address.clone()
    } else {
        let cluster = manager.registry.get_cluster(cluster_id).await?;
        cluster
            .master()
            .map(|m| m.address.clone())
            .unwrap_or_default()
    };

    info!(node_id = %node_id, cluster_id, is_first_node, "node handshake complete");

    if !is_first_node {
        let manager = Arc::clone(manager);
        let node_id_owned = node_id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.on_slave_joined(DEFAULT_CLUSTER_ID, &node_id_owned).await {
                warn!(node_id = %node_id_owned, error = %e, "slave bootstrap/election failed");
            }
        });
    }

    Ok(encode_handshake_reply(cluster_id, &node_id, &master_address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_stable_for_same_hw_addr() {
        let hw = [0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e];
        assert_eq!(derive_node_id(hw), derive_node_id(hw));
        assert_eq!(derive_node_id(hw), "001a2b3c4d5e");
    }

    #[test]
    fn decode_round_trips_through_encode() {
        let mut payload = BytesMut::new();
        payload.put_slice(&[1, 2, 3, 4, 5, 6]);
        payload.put_u16(4);
        payload.put_slice(b"host");
        payload.put_u64(1024);

        let req = decode_handshake_request(payload).unwrap();
        assert_eq!(req.hw_addr, [1, 2, 3, 4, 5, 6]);
        assert_eq!(req.bind_address, "host");
        assert_eq!(req.size, 1024);
    }
}
