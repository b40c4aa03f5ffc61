// src/core/registry/mod.rs

//! Cluster/Node registry: persistent record of clusters, their nodes, roles,
//! and liveness.

pub mod model;
pub mod mutex;
pub mod store;

pub use model::{Cluster, ClusterId, Node, NodeId, NodeRole};
pub use mutex::{ClusterMutex, LocalClusterMutex};
pub use store::{ClusterRegistry, InMemoryClusterRegistry};
