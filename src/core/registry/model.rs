// src/core/registry/model.rs

//! Data model for clusters and nodes, per the cluster/node registry contract.

use serde::{Deserialize, Serialize};

pub type ClusterId = String;
pub type NodeId = String;

/// The role a node holds within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Master,
    Slave,
}

/// A single data node within a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub role: NodeRole,
    pub size: u64,
    pub alive: bool,
    pub last_handshake: chrono::DateTime<chrono::Utc>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            role: NodeRole::Slave,
            size,
            alive: true,
            last_handshake: chrono::Utc::now(),
        }
    }
}

/// A replication group: one master, zero or more slaves, all holding the same
/// chunk set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub nodes: Vec<Node>,
    /// True during membership transitions or bootstrap; no job may execute.
    pub paralyzed: bool,
    /// Pending size commitments not yet reflected in `used_bytes`.
    pub reservations: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl Cluster {
    pub fn new(id: impl Into<ClusterId>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            paralyzed: false,
            reservations: 0,
            total_bytes: 0,
            used_bytes: 0,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    pub fn master(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.role == NodeRole::Master)
    }

    pub fn alive_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.alive)
    }
}
