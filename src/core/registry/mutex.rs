// src/core/registry/mutex.rs

//! Distributed mutex contract used to serialize registry writes per cluster.
//!
//! The real lock provider (an external key/value store, e.g. Redis) is an
//! external collaborator out of scope for this core; this trait is the seam
//! the registry calls through, and `LocalClusterMutex` is the in-process
//! default used for tests and single-manager deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::errors::SyncError;

/// Held while a cluster's registry state is being mutated. Dropping the guard
/// releases the lock.
pub type LockGuard = OwnedMutexGuard<()>;

#[async_trait]
pub trait ClusterMutex: Send + Sync {
    /// Acquires the lock for `cluster:<id>`, failing with `LockTimeout` if it
    /// cannot be acquired within `timeout`.
    async fn lock(&self, cluster_id: &str, timeout: Duration) -> Result<LockGuard, SyncError>;
}

/// In-process mutex keyed by cluster id. Stands in for the external
/// distributed lock provider named in spec Non-goals.
#[derive(Default)]
pub struct LocalClusterMutex {
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalClusterMutex {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl ClusterMutex for LocalClusterMutex {
    async fn lock(&self, cluster_id: &str, timeout: Duration) -> Result<LockGuard, SyncError> {
        let mtx = self.entry(cluster_id);
        match tokio::time::timeout(timeout, mtx.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(SyncError::LockTimeout(format!("cluster:{cluster_id}"))),
        }
    }
}
