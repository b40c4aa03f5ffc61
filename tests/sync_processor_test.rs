//! End-to-end coverage of the sync processor driven through its public
//! surface: push a job onto a real `SyncQueue`, spawn a real worker pool, and
//! observe the chunk index converge. The processor's own `#[cfg(test)]`
//! module exercises `run_pass` directly; this file exercises the same
//! scenarios the way a caller outside the crate would, queue and worker pool
//! included.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dfs_sync_manager::core::errors::SyncError;
use dfs_sync_manager::core::index::ChunkIndex;
use dfs_sync_manager::core::queue::{InMemorySyncQueue, SyncJob, SyncOp, SyncQueue, TargetState};
use dfs_sync_manager::core::registry::{Cluster, ClusterRegistry, InMemoryClusterRegistry, LocalClusterMutex, Node};
use dfs_sync_manager::core::rpc::{DataNodeClient, HandshakeReply, NodeRpcCache, Status};
use dfs_sync_manager::SyncManager;
use tokio::sync::broadcast;

struct AlwaysOkClient;

#[async_trait]
impl DataNodeClient for AlwaysOkClient {
    async fn sync_create(&self, _sha: &str, _source_address: &str) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
    async fn sync_delete(&self, _sha: &str) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
    async fn hash_list(&self) -> Result<Vec<String>, SyncError> {
        Ok(vec![])
    }
    async fn handshake(&self, _hw_addr: [u8; 6], _bind_address: &str, _size: u64) -> Result<HandshakeReply, SyncError> {
        unimplemented!()
    }
    async fn promote_master(&self) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
    async fn demote_to_slave(&self, _master_address: &str) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
}

struct AlwaysFailClient;

#[async_trait]
impl DataNodeClient for AlwaysFailClient {
    async fn sync_create(&self, _sha: &str, _source_address: &str) -> Result<Status, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
    async fn sync_delete(&self, _sha: &str) -> Result<Status, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
    async fn hash_list(&self) -> Result<Vec<String>, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
    async fn handshake(&self, _hw_addr: [u8; 6], _bind_address: &str, _size: u64) -> Result<HandshakeReply, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
    async fn promote_master(&self) -> Result<Status, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
    async fn demote_to_slave(&self, _master_address: &str) -> Result<Status, SyncError> {
        Err(SyncError::NodeUnreachable("down".into()))
    }
}

/// Always succeeds, but only after a deliberate delay — gives a test a
/// window to send shutdown while a target's RPC is still in flight.
struct SlowClient;

#[async_trait]
impl DataNodeClient for SlowClient {
    async fn sync_create(&self, _sha: &str, _source_address: &str) -> Result<Status, SyncError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Status::Ok)
    }
    async fn sync_delete(&self, _sha: &str) -> Result<Status, SyncError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Status::Ok)
    }
    async fn hash_list(&self) -> Result<Vec<String>, SyncError> {
        Ok(vec![])
    }
    async fn handshake(&self, _hw_addr: [u8; 6], _bind_address: &str, _size: u64) -> Result<HandshakeReply, SyncError> {
        unimplemented!()
    }
    async fn promote_master(&self) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
    async fn demote_to_slave(&self, _master_address: &str) -> Result<Status, SyncError> {
        Ok(Status::Ok)
    }
}

fn manager_with(good_nodes: &'static [&'static str]) -> Arc<SyncManager> {
    let mutex = Arc::new(LocalClusterMutex::new());
    let registry: Arc<dyn ClusterRegistry> = Arc::new(InMemoryClusterRegistry::new(mutex));
    let index = Arc::new(ChunkIndex::new());
    let queue: Arc<dyn SyncQueue> = Arc::new(InMemorySyncQueue::new());
    let rpc = Arc::new(NodeRpcCache::new(Arc::new(move |addr: &str| {
        if good_nodes.iter().any(|g| addr.starts_with(g)) {
            Arc::new(AlwaysOkClient) as Arc<dyn DataNodeClient>
        } else {
            Arc::new(AlwaysFailClient) as Arc<dyn DataNodeClient>
        }
    })));
    Arc::new(SyncManager::new(registry, index, queue, rpc))
}

async fn wait_until_contains(index: &ChunkIndex, sha: &str, node_id: &str, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            if index.contains(sha, node_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replication_converges_through_the_real_queue_and_worker_pool() {
    let manager = manager_with(&["B", "C"]);
    manager.registry.ensure_cluster("c1").await.unwrap();
    manager.registry.add_node("c1", Node::new("A", "A:9400", 1024)).await.unwrap();
    manager.registry.add_node("c1", Node::new("B", "B:9400", 1024)).await.unwrap();
    manager.registry.add_node("c1", Node::new("C", "C:9400", 1024)).await.unwrap();

    manager
        .queue
        .push(SyncJob::new(
            "c1",
            "A:9400",
            "deadbeef",
            SyncOp::Create,
            vec![TargetState::new("B", 10), TargetState::new("C", 10)],
        ))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut workers = manager.spawn_workers(2, shutdown_tx.clone());

    assert!(wait_until_contains(&manager.index, "deadbeef", "B", Duration::from_secs(2)).await);
    assert!(wait_until_contains(&manager.index, "deadbeef", "C", Duration::from_secs(2)).await);

    let _ = shutdown_tx.send(());
    while workers.join_next().await.is_some() {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_target_does_not_block_the_reachable_ones() {
    let manager = manager_with(&["B"]);
    manager.registry.ensure_cluster("c1").await.unwrap();
    manager.registry.add_node("c1", Node::new("B", "B:9400", 1024)).await.unwrap();
    manager.registry.add_node("c1", Node::new("C", "C:9400", 1024)).await.unwrap();

    manager
        .queue
        .push(SyncJob::new(
            "c1",
            "A:9400",
            "cafef00d",
            SyncOp::Create,
            // Counter of 1: the unreachable target is pruned on its first
            // failed attempt instead of being retried indefinitely, keeping
            // this test fast and deterministic.
            vec![TargetState::new("B", 10), TargetState::new("C", 1)],
        ))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut workers = manager.spawn_workers(1, shutdown_tx.clone());

    assert!(wait_until_contains(&manager.index, "cafef00d", "B", Duration::from_secs(2)).await);
    assert!(!manager.index.contains("cafef00d", "C"));

    let _ = shutdown_tx.send(());
    while workers.join_next().await.is_some() {}
}

// A job is picked up, dispatch is in flight against both targets, shutdown
// arrives before either RPC completes. The worker must not sit out the
// in-flight RPC's delay: it cancels dispatch and requeues the *whole*
// original job (unchanged counters, not completed), rather than whatever
// partial progress had been made.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_mid_job_requeues_the_whole_job_without_waiting_out_the_job() {
    let mutex = Arc::new(LocalClusterMutex::new());
    let registry: Arc<dyn ClusterRegistry> = Arc::new(InMemoryClusterRegistry::new(mutex));
    let index = Arc::new(ChunkIndex::new());
    let queue: Arc<dyn SyncQueue> = Arc::new(InMemorySyncQueue::new());
    let rpc = Arc::new(NodeRpcCache::new(Arc::new(|_addr: &str| {
        Arc::new(SlowClient) as Arc<dyn DataNodeClient>
    })));
    let manager = Arc::new(SyncManager::new(registry, index.clone(), queue, rpc));
    manager.registry.ensure_cluster("c1").await.unwrap();
    manager.registry.add_node("c1", Node::new("B", "B:9400", 1024)).await.unwrap();
    manager.registry.add_node("c1", Node::new("C", "C:9400", 1024)).await.unwrap();

    manager
        .queue
        .push(SyncJob::new(
            "c1",
            "A:9400",
            "midflightsha",
            SyncOp::Create,
            vec![TargetState::new("B", 10), TargetState::new("C", 10)],
        ))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut workers = manager.spawn_workers(1, shutdown_tx.clone());

    // Let the worker pop the job and start dispatch (both targets now
    // sleeping inside `SlowClient`, which takes 5s) before asking it to shut
    // down. A 1s timeout here only passes if shutdown actually cancels the
    // in-flight dispatch rather than waiting out `SlowClient`'s delay.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown_tx.send(());

    tokio::time::timeout(Duration::from_secs(1), async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .expect("worker should cancel dispatch on shutdown instead of waiting out the in-flight RPC delay");

    assert_eq!(manager.queue.len().await, 1);
    let requeued = manager.queue.pop().await.unwrap().unwrap();
    assert_eq!(requeued.sha512_hex, "midflightsha");
    assert_eq!(requeued.targets.len(), 2);
    assert!(requeued.targets.iter().all(|t| t.counter == 10 && !t.completed));
    assert!(!index.contains("midflightsha", "B"));
    assert!(!index.contains("midflightsha", "C"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paralyzed_cluster_blocks_until_cleared() {
    let mut cluster = Cluster::new("c1");
    cluster.paralyzed = true;
    cluster.nodes.push(Node::new("B", "B:9400", 1024));
    let concrete_registry = InMemoryClusterRegistry::new(Arc::new(LocalClusterMutex::new()));
    concrete_registry.seed(cluster);
    let registry: Arc<dyn ClusterRegistry> = Arc::new(concrete_registry);
    let index = Arc::new(ChunkIndex::new());
    let queue: Arc<dyn SyncQueue> = Arc::new(InMemorySyncQueue::new());
    let rpc = Arc::new(NodeRpcCache::new(Arc::new(|_addr: &str| {
        Arc::new(AlwaysOkClient) as Arc<dyn DataNodeClient>
    })));
    let manager = Arc::new(SyncManager::new(registry, index, queue, rpc));

    manager
        .queue
        .push(SyncJob::new(
            "c1",
            "A:9400",
            "paralyzedsha",
            SyncOp::Create,
            vec![TargetState::new("B", 10)],
        ))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut workers = manager.spawn_workers(1, shutdown_tx.clone());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!manager.index.contains("paralyzedsha", "B"));

    manager.registry.set_paralyzed("c1", false).await.unwrap();
    assert!(wait_until_contains(&manager.index, "paralyzedsha", "B", Duration::from_secs(2)).await);

    let _ = shutdown_tx.send(());
    while workers.join_next().await.is_some() {}
}
