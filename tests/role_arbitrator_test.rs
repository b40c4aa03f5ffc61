//! End-to-end failover coverage for the role arbitrator, driven through
//! `SyncManager` the way the handshake listener and liveness watchdog would
//! call it, rather than constructing a bare `RoleArbitrator`.

use std::sync::Arc;

use async_trait::async_trait;
use dfs_sync_manager::core::errors::SyncError;
use dfs_sync_manager::core::index::ChunkIndex;
use dfs_sync_manager::core::queue::{InMemorySyncQueue, SyncQueue};
use dfs_sync_manager::core::registry::{Cluster, ClusterRegistry, InMemoryClusterRegistry, LocalClusterMutex, Node, NodeRole};
use dfs_sync_manager::core::rpc::{DataNodeClient, HandshakeReply, NodeRpcCache, Status};
use dfs_sync_manager::SyncManager;

struct AckingClient;

#[async_trait]
impl DataNodeClient for AckingClient {
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

fn manager_with_acking_nodes() -> Arc<SyncManager> {
    let registry: Arc<dyn ClusterRegistry> =
        Arc::new(InMemoryClusterRegistry::new(Arc::new(LocalClusterMutex::new())));
    let index = Arc::new(ChunkIndex::new());
    let queue: Arc<dyn SyncQueue> = Arc::new(InMemorySyncQueue::new());
    let rpc = Arc::new(NodeRpcCache::new(Arc::new(|_addr: &str| {
        Arc::new(AckingClient) as Arc<dyn DataNodeClient>
    })));
    Arc::new(SyncManager::new(registry, index, queue, rpc))
}

#[tokio::test]
async fn master_failure_triggers_election_of_a_surviving_node() {
    let manager = manager_with_acking_nodes();
    let mut cluster = Cluster::new("c1");
    let mut master = Node::new("A", "A:9400", 1);
    master.role = NodeRole::Master;
    cluster.nodes.push(master);
    cluster.nodes.push(Node::new("B", "B:9400", 1));
    cluster.nodes.push(Node::new("C", "C:9400", 1));
    manager.registry.ensure_cluster("c1").await.unwrap();
    for node in cluster.nodes {
        manager.registry.add_node("c1", node).await.unwrap();
    }

    // A goes dark.
    manager
        .registry
        .update_node_liveness("c1", "A", false, chrono::Utc::now())
        .await
        .unwrap();

    manager.arbitrator.handle_membership_change("c1").await.unwrap();

    let cluster = manager.registry.get_cluster("c1").await.unwrap();
    // B < C lexicographically among the two survivors.
    assert_eq!(cluster.master().unwrap().id, "B");
    assert!(!cluster.paralyzed);
    assert_eq!(cluster.node("C").unwrap().role, NodeRole::Slave);
}

#[tokio::test]
async fn reelection_is_a_no_op_while_the_master_is_healthy() {
    let manager = manager_with_acking_nodes();
    let mut cluster = Cluster::new("c1");
    let mut master = Node::new("Z", "Z:9400", 1);
    master.role = NodeRole::Master;
    cluster.nodes.push(master);
    cluster.nodes.push(Node::new("A", "A:9400", 1));
    manager.registry.ensure_cluster("c1").await.unwrap();
    for node in cluster.nodes {
        manager.registry.add_node("c1", node).await.unwrap();
    }

    // "A" sorts before "Z", but stickiness keeps the healthy incumbent.
    manager.arbitrator.handle_membership_change("c1").await.unwrap();

    let cluster = manager.registry.get_cluster("c1").await.unwrap();
    assert_eq!(cluster.master().unwrap().id, "Z");
}

#[tokio::test]
async fn total_outage_paralyzes_the_cluster_instead_of_electing_nobody() {
    let manager = manager_with_acking_nodes();
    let mut dead = Node::new("A", "A:9400", 1);
    dead.alive = false;
    dead.role = NodeRole::Master;
    manager.registry.ensure_cluster("c1").await.unwrap();
    manager.registry.add_node("c1", dead).await.unwrap();

    manager.arbitrator.handle_membership_change("c1").await.unwrap();

    assert!(manager.registry.get_cluster("c1").await.unwrap().paralyzed);
}
