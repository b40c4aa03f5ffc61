// src/core/index/mod.rs

//! Chunk Index: `sha -> set<nodeId>` mapping with concurrent upsert/remove.
//!
//! Built over a `DashMap` of `DashSet`s (per-key sharded locking rather than
//! one global mutex). Per-sha operations are linearizable because
//! `DashMap`'s sharded locking makes each `entry()` call atomic with respect
//! to other operations on the same key.

use dashmap::DashMap;
use dashmap::DashSet;
use std::sync::Arc;

use crate::core::registry::NodeId;

pub type ShaHex = String;

#[derive(Default)]
pub struct ChunkIndex {
    entries: DashMap<ShaHex, Arc<DashSet<NodeId>>>,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert: adding a node that already holds the chunk is a
    /// no-op.
    pub fn add_node_to_chunk(&self, sha: &str, node_id: &str) {
        let set = self
            .entries
            .entry(sha.to_string())
            .or_insert_with(|| Arc::new(DashSet::new()));
        set.insert(node_id.to_string());
    }

    /// Idempotent remove; if the resulting set is empty, the entry is
    /// deleted entirely so `NodesOfChunk` on an untracked sha reports empty.
    pub fn remove_node_from_chunk(&self, sha: &str, node_id: &str) {
        if let Some(set) = self.entries.get(sha) {
            set.remove(node_id);
            if set.is_empty() {
                drop(set);
                self.entries.remove(sha);
            }
        }
    }

    pub fn nodes_of_chunk(&self, sha: &str) -> Vec<NodeId> {
        self.entries
            .get(sha)
            .map(|set| set.iter().map(|n| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, sha: &str, node_id: &str) -> bool {
        self.entries
            .get(sha)
            .map(|set| set.contains(node_id))
            .unwrap_or(false)
    }

    /// Finite, non-restartable snapshot of every sha currently held by
    /// `node_id`. Used by bootstrap diffing; callers must consume the
    /// returned vector before the index can change meaning for them.
    pub fn chunks_of_node(&self, node_id: &str) -> Vec<ShaHex> {
        self.entries
            .iter()
            .filter(|e| e.value().contains(node_id))
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_is_idempotent() {
        let idx = ChunkIndex::new();
        idx.add_node_to_chunk("sha1", "n1");
        idx.add_node_to_chunk("sha1", "n1");
        assert_eq!(idx.nodes_of_chunk("sha1"), vec!["n1".to_string()]);
    }

    #[test]
    fn remove_deletes_empty_entry() {
        let idx = ChunkIndex::new();
        idx.add_node_to_chunk("sha1", "n1");
        idx.remove_node_from_chunk("sha1", "n1");
        assert!(idx.nodes_of_chunk("sha1").is_empty());
        assert!(!idx.contains("sha1", "n1"));
    }

    #[test]
    fn chunks_of_node_reflects_membership() {
        let idx = ChunkIndex::new();
        idx.add_node_to_chunk("sha1", "n1");
        idx.add_node_to_chunk("sha2", "n1");
        idx.add_node_to_chunk("sha3", "n2");
        let mut chunks = idx.chunks_of_node("n1");
        chunks.sort();
        assert_eq!(chunks, vec!["sha1".to_string(), "sha2".to_string()]);
    }

    #[test]
    fn remove_from_untracked_chunk_is_noop() {
        let idx = ChunkIndex::new();
        idx.remove_node_from_chunk("sha1", "n1");
        assert!(idx.nodes_of_chunk("sha1").is_empty());
    }
}
