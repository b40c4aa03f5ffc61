// src/core/errors.rs

//! Defines the primary error type for the sync manager.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the manager.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait
/// implementations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("node {0} is unreachable")]
    NodeUnreachable(String),

    #[error("RPC to node {node} timed out after {timeout_ms}ms")]
    RpcTimeout { node: String, timeout_ms: u64 },

    #[error("failed to acquire lock for key '{0}' within the deadline")]
    LockTimeout(String),

    #[error("index update for sha {sha} conflicted: {reason}")]
    IndexConflict { sha: String, reason: String },

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("chunk size mismatch for sha {sha}: expected {expected}, got {actual}")]
    ChunkSizeMismatch {
        sha: String,
        expected: u64,
        actual: u64,
    },

    #[error("cluster '{0}' is paralyzed")]
    ClusterParalyzed(String),

    #[error("node '{0}' already exists in cluster")]
    NodeConflict(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid sha512 hex digest: {0}")]
    InvalidSha(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Clone for SyncError {
    fn clone(&self) -> Self {
        match self {
            SyncError::Io(e) => SyncError::Io(Arc::clone(e)),
            SyncError::NodeUnreachable(s) => SyncError::NodeUnreachable(s.clone()),
            SyncError::RpcTimeout { node, timeout_ms } => SyncError::RpcTimeout {
                node: node.clone(),
                timeout_ms: *timeout_ms,
            },
            SyncError::LockTimeout(s) => SyncError::LockTimeout(s.clone()),
            SyncError::IndexConflict { sha, reason } => SyncError::IndexConflict {
                sha: sha.clone(),
                reason: reason.clone(),
            },
            SyncError::ClusterNotFound(s) => SyncError::ClusterNotFound(s.clone()),
            SyncError::ChunkSizeMismatch {
                sha,
                expected,
                actual,
            } => SyncError::ChunkSizeMismatch {
                sha: sha.clone(),
                expected: *expected,
                actual: *actual,
            },
            SyncError::ClusterParalyzed(s) => SyncError::ClusterParalyzed(s.clone()),
            SyncError::NodeConflict(s) => SyncError::NodeConflict(s.clone()),
            SyncError::Protocol(s) => SyncError::Protocol(s.clone()),
            SyncError::InvalidSha(s) => SyncError::InvalidSha(s.clone()),
            SyncError::Config(s) => SyncError::Config(s.clone()),
            SyncError::Internal(s) => SyncError::Internal(s.clone()),
        }
    }
}

impl SyncError {
    /// Transient errors are retried with a counter decrement and requeue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::NodeUnreachable(_)
                | SyncError::RpcTimeout { .. }
                | SyncError::LockTimeout(_)
                | SyncError::IndexConflict { .. }
                | SyncError::Io(_)
        )
    }

    /// Paralysis errors requeue the job without touching any target's counter.
    pub fn is_paralysis(&self) -> bool {
        matches!(self, SyncError::ClusterParalyzed(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for SyncError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SyncError::RpcTimeout {
            node: "unknown".into(),
            timeout_ms: 0,
        }
    }
}
