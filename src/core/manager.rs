// src/core/manager.rs

//! Composition root: owns the injected collaborators and wires them into
//! workers. No process-wide singletons — everything here is constructed
//! once and cloned (as `Arc`s) into every worker task.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::core::arbitrator::RoleArbitrator;
use crate::core::bootstrap::SlaveBootstrap;
use crate::core::errors::SyncError;
use crate::core::index::ChunkIndex;
use crate::core::queue::{SyncJob, SyncOp, SyncQueue, TargetState, DEFAULT_TARGET_COUNTER};
use crate::core::registry::{ClusterMutex, ClusterRegistry, InMemoryClusterRegistry, LocalClusterMutex};
use crate::core::rpc::NodeRpcCache;
use crate::core::sync::SyncProcessor;

/// Owns every injected collaborator for the manager's sync core: registry,
/// index, queue, RPC cache, mutex, processor, arbitrator, and bootstrap
/// driver.
pub struct SyncManager {
    pub registry: Arc<dyn ClusterRegistry>,
    pub index: Arc<ChunkIndex>,
    pub queue: Arc<dyn SyncQueue>,
    pub rpc: Arc<NodeRpcCache>,
    pub processor: Arc<SyncProcessor>,
    pub arbitrator: Arc<RoleArbitrator>,
    pub bootstrap: Arc<SlaveBootstrap>,
    /// Initial retry counter handed to every `TargetState` built by
    /// `enqueue_chunk_mutation`. Defaults to `DEFAULT_TARGET_COUNTER`;
    /// `main` overrides it from the validated `target_retry_counter` config
    /// field via `with_target_retry_counter`.
    pub target_retry_counter: i32,
}

impl SyncManager {
    /// Builds a manager over the given collaborators. Use
    /// `SyncManager::in_memory` for tests and single-process deployments
    /// that need no external store.
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        index: Arc<ChunkIndex>,
        queue: Arc<dyn SyncQueue>,
        rpc: Arc<NodeRpcCache>,
    ) -> Self {
        let processor = Arc::new(SyncProcessor::new(
            registry.clone(),
            index.clone(),
            queue.clone(),
            rpc.clone(),
        ));
        let arbitrator = Arc::new(RoleArbitrator::new(registry.clone(), rpc.clone()));
        let bootstrap = Arc::new(SlaveBootstrap::new(registry.clone(), rpc.clone(), index.clone()));
        Self {
            registry,
            index,
            queue,
            rpc,
            processor,
            arbitrator,
            bootstrap,
            target_retry_counter: DEFAULT_TARGET_COUNTER,
        }
    }

    /// Overrides the retry counter new jobs are seeded with. Builder-style so
    /// `main` can chain it onto `in_memory()`/`new()` without threading a
    /// fifth constructor argument through every call site.
    pub fn with_target_retry_counter(mut self, counter: i32) -> Self {
        self.target_retry_counter = counter;
        self
    }

    /// Convenience constructor wiring the in-memory default implementations
    /// of every injected trait, with TCP-backed data-node clients.
    pub fn in_memory() -> Self {
        let mutex: Arc<dyn ClusterMutex> = Arc::new(LocalClusterMutex::new());
        let registry: Arc<dyn ClusterRegistry> = Arc::new(InMemoryClusterRegistry::new(mutex));
        let index = Arc::new(ChunkIndex::new());
        let queue: Arc<dyn SyncQueue> = Arc::new(crate::core::queue::InMemorySyncQueue::new());
        let rpc = Arc::new(NodeRpcCache::with_tcp_factory());
        Self::new(registry, index, queue, rpc)
    }

    /// Entry point for "a mutating chunk operation at a data node reports
    /// its new state upstream" (§2): builds one `TargetState` per other
    /// member of the cluster and pushes the resulting job onto the queue.
    /// The report itself arrives over whatever channel the caller (the
    /// head-node front-end, or an inbound RPC handler) uses — both are
    /// external collaborators this core does not define.
    pub async fn enqueue_chunk_mutation(
        &self,
        cluster_id: &str,
        source_address: &str,
        sha512_hex: &str,
        op: SyncOp,
    ) -> Result<(), SyncError> {
        let cluster = self.registry.get_cluster(cluster_id).await?;
        let targets: Vec<TargetState> = cluster
            .nodes
            .iter()
            .filter(|n| n.address != source_address)
            .map(|n| TargetState::new(n.id.clone(), self.target_retry_counter))
            .collect();
        if targets.is_empty() {
            return Ok(());
        }
        let job = SyncJob::new(cluster_id, source_address, sha512_hex, op, targets);
        self.queue.push(job).await
    }

    /// Handles a node joining a cluster as slave: runs bootstrap, then lets
    /// the arbitrator re-evaluate the master election (a no-op if the
    /// existing master is still alive, per stickiness).
    pub async fn on_slave_joined(
        &self,
        cluster_id: &str,
        slave_node_id: &str,
    ) -> Result<(), SyncError> {
        let cluster = self.registry.get_cluster(cluster_id).await?;
        let master_id = cluster
            .master()
            .map(|m| m.id.clone())
            .ok_or_else(|| SyncError::Internal(format!("cluster {cluster_id} has no master")))?;

        self.bootstrap.run(cluster_id, slave_node_id, &master_id).await?;
        self.arbitrator.handle_membership_change(cluster_id).await
    }

    /// Spawns the sync processor's supervised worker pool. Returns the
    /// `JoinSet` so the caller (typically `main`) can await full drain on
    /// shutdown.
    pub fn spawn_workers(&self, pool_size: usize, shutdown: broadcast::Sender<()>) -> JoinSet<()> {
        self.processor.run_worker_pool(pool_size, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Node;

    #[tokio::test]
    async fn enqueue_chunk_mutation_targets_every_other_node_with_configured_counter() {
        let manager = SyncManager::in_memory().with_target_retry_counter(3);
        manager.registry.ensure_cluster("c1").await.unwrap();
        manager.registry.add_node("c1", Node::new("a", "a:9400", 1)).await.unwrap();
        manager.registry.add_node("c1", Node::new("b", "b:9400", 1)).await.unwrap();
        manager.registry.add_node("c1", Node::new("c", "c:9400", 1)).await.unwrap();

        manager
            .enqueue_chunk_mutation("c1", "a:9400", "deadbeef", SyncOp::Create)
            .await
            .unwrap();

        let job = manager.queue.pop().await.unwrap().unwrap();
        assert_eq!(job.source_address, "a:9400");
        assert_eq!(job.targets.len(), 2);
        assert!(job.targets.iter().all(|t| t.counter == 3));
        let target_nodes: std::collections::HashSet<_> =
            job.targets.iter().map(|t| t.node.as_str()).collect();
        assert_eq!(target_nodes, std::collections::HashSet::from(["b", "c"]));
    }

    #[tokio::test]
    async fn enqueue_chunk_mutation_is_a_no_op_for_a_single_node_cluster() {
        let manager = SyncManager::in_memory();
        manager.registry.ensure_cluster("c1").await.unwrap();
        manager.registry.add_node("c1", Node::new("a", "a:9400", 1)).await.unwrap();

        manager
            .enqueue_chunk_mutation("c1", "a:9400", "deadbeef", SyncOp::Create)
            .await
            .unwrap();

        assert_eq!(manager.queue.len().await, 0);
    }
}
