// src/core/registry/store.rs

//! Persistent store of clusters, their nodes, roles, and liveness.
//!
//! Grounded on `ClusterState`'s `DashMap`-of-nodes idiom: the registry is
//! concurrency-safe for many readers and writers, with per-cluster mutation
//! additionally serialized through an injected `ClusterMutex` so that two
//! manager instances (or two local callers) never race a membership change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use super::model::{Cluster, ClusterId, Node, NodeId};
use super::mutex::ClusterMutex;
use crate::core::errors::SyncError;
use crate::core::metrics;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    async fn get_cluster(&self, id: &str) -> Result<Cluster, SyncError>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>, SyncError>;
    async fn add_node(&self, cluster_id: &str, node: Node) -> Result<(), SyncError>;
    async fn remove_node(&self, cluster_id: &str, node_id: &str) -> Result<(), SyncError>;
    async fn set_paralyzed(&self, cluster_id: &str, paralyzed: bool) -> Result<(), SyncError>;
    async fn update_node_liveness(
        &self,
        cluster_id: &str,
        node_id: &str,
        alive: bool,
        ts: DateTime<Utc>,
    ) -> Result<(), SyncError>;
    async fn set_node_role(
        &self,
        cluster_id: &str,
        node_id: &str,
        role: super::model::NodeRole,
    ) -> Result<(), SyncError>;
    /// Creates an empty, unparalyzed cluster under `cluster_id` if none
    /// exists yet. Idempotent. Used by the handshake path, which is the one
    /// caller allowed to create clusters lazily as nodes join.
    async fn ensure_cluster(&self, cluster_id: &str) -> Result<(), SyncError>;
}

/// In-memory registry backed by a concurrent map. Default implementation for
/// tests and single-process deployments; the durable document store named in
/// the external-interfaces section is reached through the same trait.
pub struct InMemoryClusterRegistry {
    clusters: DashMap<ClusterId, Cluster>,
    mutex: Arc<dyn ClusterMutex>,
}

impl InMemoryClusterRegistry {
    pub fn new(mutex: Arc<dyn ClusterMutex>) -> Self {
        Self {
            clusters: DashMap::new(),
            mutex,
        }
    }

    /// Test/bootstrap helper: inserts a cluster wholesale, bypassing the lock.
    pub fn seed(&self, cluster: Cluster) {
        self.clusters.insert(cluster.id.clone(), cluster);
    }

    async fn with_lock<F, T>(&self, cluster_id: &str, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut Cluster) -> Result<T, SyncError> + Send,
    {
        let _guard = self.mutex.lock(cluster_id, DEFAULT_LOCK_TIMEOUT).await?;
        let mut entry = self
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| SyncError::ClusterNotFound(cluster_id.to_string()))?;
        f(&mut entry)
    }
}

#[async_trait]
impl ClusterRegistry for InMemoryClusterRegistry {
    async fn get_cluster(&self, id: &str) -> Result<Cluster, SyncError> {
        self.clusters
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| SyncError::ClusterNotFound(id.to_string()))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, SyncError> {
        Ok(self.clusters.iter().map(|e| e.value().clone()).collect())
    }

    async fn add_node(&self, cluster_id: &str, node: Node) -> Result<(), SyncError> {
        self.with_lock(cluster_id, |cluster| {
            if cluster.node(&node.id).is_some() {
                return Err(SyncError::NodeConflict(node.id.clone()));
            }
            cluster.nodes.push(node);
            Ok(())
        })
        .await
    }

    async fn remove_node(&self, cluster_id: &str, node_id: &str) -> Result<(), SyncError> {
        self.with_lock(cluster_id, |cluster| {
            let before = cluster.nodes.len();
            cluster.nodes.retain(|n| n.id != node_id);
            if cluster.nodes.len() == before {
                return Err(SyncError::Internal(format!(
                    "node {node_id} not found in cluster {cluster_id}"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn set_paralyzed(&self, cluster_id: &str, paralyzed: bool) -> Result<(), SyncError> {
        self.with_lock(cluster_id, |cluster| {
            cluster.paralyzed = paralyzed;
            Ok(())
        })
        .await?;
        metrics::CLUSTER_PARALYZED
            .with_label_values(&[cluster_id])
            .set(if paralyzed { 1.0 } else { 0.0 });
        Ok(())
    }

    async fn update_node_liveness(
        &self,
        cluster_id: &str,
        node_id: &str,
        alive: bool,
        ts: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        self.with_lock(cluster_id, |cluster| {
            let node = cluster.node_mut(node_id).ok_or_else(|| {
                SyncError::Internal(format!("node {node_id} not found in cluster {cluster_id}"))
            })?;
            node.alive = alive;
            node.last_handshake = ts;
            Ok(())
        })
        .await
    }

    async fn set_node_role(
        &self,
        cluster_id: &str,
        node_id: &str,
        role: super::model::NodeRole,
    ) -> Result<(), SyncError> {
        self.with_lock(cluster_id, |cluster| {
            let node = cluster.node_mut(node_id).ok_or_else(|| {
                SyncError::Internal(format!("node {node_id} not found in cluster {cluster_id}"))
            })?;
            node.role = role;
            Ok(())
        })
        .await
    }

    async fn ensure_cluster(&self, cluster_id: &str) -> Result<(), SyncError> {
        self.clusters
            .entry(cluster_id.to_string())
            .or_insert_with(|| Cluster::new(cluster_id));
        Ok(())
    }
}
