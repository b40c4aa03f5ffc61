// src/core/arbitrator/mod.rs

//! Role arbitrator: on membership change, picks a master per cluster and
//! notifies nodes.
//!
//! Grounded on `MasterMonitor`'s SDOWN detection / quorum-vote /
//! `FailoverState` state machine, adapted from Sentinel-style external
//! monitoring to in-process membership-change-triggered election — the
//! manager calls the arbitrator directly, there is no gossip bus.
//! `PromoteMaster`/`DemoteToSlave` are dispatched through the same RPC
//! client cache (§4.C) used by the sync processor, not a separate channel.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::errors::SyncError;
use crate::core::metrics;
use crate::core::registry::{ClusterRegistry, Node, NodeRole};
use crate::core::rpc::{NodeRpcCache, Status};

pub struct RoleArbitrator {
    registry: Arc<dyn ClusterRegistry>,
    rpc: Arc<NodeRpcCache>,
}

impl RoleArbitrator {
    pub fn new(registry: Arc<dyn ClusterRegistry>, rpc: Arc<NodeRpcCache>) -> Self {
        Self { registry, rpc }
    }

    /// Entry point invoked by the registry whenever a node is added, removed,
    /// or its liveness changes. Idempotent: if the existing master is still
    /// alive, this is a no-op (stickiness).
    pub async fn handle_membership_change(&self, cluster_id: &str) -> Result<(), SyncError> {
        loop {
            let cluster = self.registry.get_cluster(cluster_id).await?;
            let current_master = cluster.master().filter(|m| m.alive).map(|m| m.id.clone());

            let alive: Vec<Node> = cluster.alive_nodes().cloned().collect();
            if alive.is_empty() {
                warn!(cluster_id, "no alive nodes remain, cluster paralyzed indefinitely");
                self.registry.set_paralyzed(cluster_id, true).await?;
                return Ok(());
            }

            let candidate = if let Some(sticky) = &current_master {
                sticky.clone()
            } else {
                elect_candidate(&alive)
            };

            if current_master.as_deref() == Some(candidate.as_str()) {
                // Stickiness: existing master is alive and stays master. No
                // PRMT/DEMT traffic.
                return Ok(());
            }

            info!(cluster_id, candidate = %candidate, "electing new master");
            self.registry.set_paralyzed(cluster_id, true).await?;

            match self.transition_roles(cluster_id, &alive, &candidate).await {
                Ok(()) => {
                    self.registry.set_paralyzed(cluster_id, false).await?;
                    metrics::ELECTIONS_TOTAL
                        .with_label_values(&[cluster_id])
                        .inc();
                    return Ok(());
                }
                Err(failed_node) => {
                    warn!(
                        cluster_id,
                        node_id = %failed_node,
                        "node failed to ACK role change within timeout, marking dead and retrying election"
                    );
                    self.registry
                        .update_node_liveness(cluster_id, &failed_node, false, chrono::Utc::now())
                        .await?;
                    // Loop again with the failed node excluded.
                }
            }
        }
    }

    /// Sends `PromoteMaster` to `candidate` and `DemoteToSlave` to every
    /// other alive node. Returns the id of the first node that fails to ACK.
    async fn transition_roles(
        &self,
        cluster_id: &str,
        alive: &[Node],
        candidate: &str,
    ) -> Result<(), String> {
        let candidate_node = alive
            .iter()
            .find(|n| n.id == candidate)
            .ok_or_else(|| candidate.to_string())?;

        let client = self.rpc.get(&candidate_node.id, &candidate_node.address);
        match client.promote_master().await {
            Ok(Status::Ok) => {}
            _ => return Err(candidate_node.id.clone()),
        }
        self.registry
            .set_node_role(cluster_id, &candidate_node.id, NodeRole::Master)
            .await
            .map_err(|_| candidate_node.id.clone())?;

        for node in alive.iter().filter(|n| n.id != candidate) {
            let client = self.rpc.get(&node.id, &node.address);
            match client.demote_to_slave(&candidate_node.address).await {
                Ok(Status::Ok) => {}
                _ => return Err(node.id.clone()),
            }
            if let Err(e) = self
                .registry
                .set_node_role(cluster_id, &node.id, NodeRole::Slave)
                .await
            {
                error!(node_id = %node.id, error = %e, "failed to persist demoted role");
                return Err(node.id.clone());
            }
        }
        Ok(())
    }
}

/// Smallest nodeId lexicographically among alive candidates (deterministic
/// tie-break).
fn elect_candidate(alive: &[Node]) -> String {
    alive
        .iter()
        .map(|n| n.id.clone())
        .min()
        .expect("alive is non-empty")
}
