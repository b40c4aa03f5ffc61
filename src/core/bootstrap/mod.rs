// src/core/bootstrap/mod.rs

//! Slave bootstrap: whole-filesystem catch-up when a node (re)joins a
//! cluster as slave.
//!
//! Grounded on `ReplicaWorker::handle_connection_cycle` (connect, handshake,
//! full resync, then live stream) but specialized to a one-shot hash-list
//! diff instead of a continuous command stream, per the wire opcode
//! `SYLS`/`HashList`.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::errors::SyncError;
use crate::core::index::ChunkIndex;
use crate::core::registry::ClusterRegistry;
use crate::core::rpc::{NodeRpcCache, Status};

pub struct SlaveBootstrap {
    registry: Arc<dyn ClusterRegistry>,
    rpc: Arc<NodeRpcCache>,
    index: Arc<ChunkIndex>,
}

/// Outcome of one bootstrap run, useful for tests and operational logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub fetched: Vec<String>,
    pub deleted: Vec<String>,
}

impl SlaveBootstrap {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        rpc: Arc<NodeRpcCache>,
        index: Arc<ChunkIndex>,
    ) -> Self {
        Self {
            registry,
            rpc,
            index,
        }
    }

    /// Runs the five-step catch-up protocol for `slave_node_id` joining
    /// `cluster_id` against the current master. Crash-restartable: running
    /// it again on an already-converged slave is a no-op (empty diff).
    pub async fn run(
        &self,
        cluster_id: &str,
        slave_node_id: &str,
        master_node_id: &str,
    ) -> Result<BootstrapReport, SyncError> {
        // Step 1: pause the sync processor for this cluster.
        self.registry.set_paralyzed(cluster_id, true).await?;

        let result = self
            .diff_and_converge(cluster_id, slave_node_id, master_node_id)
            .await;

        // Step 5 (always attempted, even on partial failure, so a future
        // re-handshake can resume from a non-paralyzed cluster): clear
        // paralysis once this attempt is done.
        if let Err(e) = self.registry.set_paralyzed(cluster_id, false).await {
            error!(cluster_id, error = %e, "failed to clear paralysis after bootstrap attempt");
        }

        result
    }

    async fn diff_and_converge(
        &self,
        cluster_id: &str,
        slave_node_id: &str,
        master_node_id: &str,
    ) -> Result<BootstrapReport, SyncError> {
        let cluster = self.registry.get_cluster(cluster_id).await?;
        let master = cluster
            .node(master_node_id)
            .ok_or_else(|| SyncError::Internal(format!("master {master_node_id} not in cluster")))?
            .clone();
        let slave = cluster
            .node(slave_node_id)
            .ok_or_else(|| SyncError::Internal(format!("slave {slave_node_id} not in cluster")))?
            .clone();

        let master_client = self.rpc.get(&master.id, &master.address);
        let slave_client = self.rpc.get(&slave.id, &slave.address);

        let master_hashes: HashSet<String> = master_client.hash_list().await?.into_iter().collect();
        let slave_hashes: HashSet<String> = slave_client.hash_list().await?.into_iter().collect();

        let to_fetch: Vec<String> = master_hashes.difference(&slave_hashes).cloned().collect();
        let to_delete: Vec<String> = slave_hashes.difference(&master_hashes).cloned().collect();

        info!(
            cluster_id,
            slave_node_id,
            to_fetch = to_fetch.len(),
            to_delete = to_delete.len(),
            "bootstrap diff computed"
        );

        for sha in &to_fetch {
            let status = slave_client.sync_create(sha, &master.address).await?;
            if status != Status::Ok {
                return Err(SyncError::Protocol(format!(
                    "bootstrap SYCR for {sha} returned {status:?}"
                )));
            }
        }
        for sha in &to_delete {
            let status = slave_client.sync_delete(sha).await?;
            if status != Status::Ok && status != Status::NotFound {
                return Err(SyncError::Protocol(format!(
                    "bootstrap SYDL for {sha} returned {status:?}"
                )));
            }
        }

        // Step 5: reconcile the chunk index against the diff just applied.
        for sha in &to_fetch {
            self.index.add_node_to_chunk(sha, &slave.id);
        }
        for sha in &to_delete {
            self.index.remove_node_from_chunk(sha, &slave.id);
        }

        Ok(BootstrapReport {
            fetched: to_fetch,
            deleted: to_delete,
        })
    }
}
