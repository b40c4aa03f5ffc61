// src/core/queue/mod.rs

//! Sync queue: a durable-ish FIFO of pending `(create|delete, sha, cluster)`
//! jobs. Delivery is at-least-once; the processor (§4.E) is responsible for
//! idempotence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::core::errors::SyncError;
use crate::core::metrics;
use crate::core::registry::{ClusterId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOp {
    Create,
    Delete,
}

/// Per-target retry state within a job. `counter` starts at a configured
/// maximum and decrements on each transient failure; `completed=true` is
/// terminal, `counter<=0 && !completed` is terminal-failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetState {
    pub node: NodeId,
    pub counter: i32,
    pub completed: bool,
}

impl TargetState {
    pub fn new(node: impl Into<NodeId>, initial_counter: i32) -> Self {
        Self {
            node: node.into(),
            counter: initial_counter,
            completed: false,
        }
    }

    /// Terminal once completed, or once the retry budget is exhausted.
    pub fn is_terminal(&self) -> bool {
        self.completed || self.counter <= 0
    }

    pub fn is_hard_failure(&self) -> bool {
        !self.completed && self.counter <= 0
    }
}

/// Default initial retry counter for a freshly created target.
pub const DEFAULT_TARGET_COUNTER: i32 = 10;

/// A unit of work representing a chunk create/delete to fan out to its
/// cluster's other members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub cluster_id: ClusterId,
    pub source_address: String,
    pub sha512_hex: String,
    pub op: SyncOp,
    pub targets: Vec<TargetState>,
    /// When this job was first created. Carried forward across requeues
    /// (the same `SyncJob` is pushed back, never rebuilt), so it measures
    /// total time-to-converge rather than time-in-current-attempt. Backs
    /// the replication-window-breach signal the health endpoint reports.
    pub enqueued_at: DateTime<Utc>,
    /// Set once `enqueued_at` has aged past the replication window, so the
    /// breach is only counted once per job rather than once per pass.
    #[serde(default)]
    pub window_breach_recorded: bool,
}

impl SyncJob {
    pub fn new(
        cluster_id: impl Into<ClusterId>,
        source_address: impl Into<String>,
        sha512_hex: impl Into<String>,
        op: SyncOp,
        targets: Vec<TargetState>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            source_address: source_address.into(),
            sha512_hex: sha512_hex.into(),
            op,
            targets,
            enqueued_at: Utc::now(),
            window_breach_recorded: false,
        }
    }
}

/// Linear backoff per spec: `min(1s * (max - counter), 30s)`.
pub fn requeue_delay(initial_counter: i32, current_counter: i32) -> Duration {
    let attempts = (initial_counter - current_counter).max(0) as u64;
    Duration::from_secs(attempts.min(30))
}

#[async_trait]
pub trait SyncQueue: Send + Sync {
    async fn push(&self, job: SyncJob) -> Result<(), SyncError>;
    async fn pop(&self) -> Result<Option<SyncJob>, SyncError>;
    /// Re-enqueues `job`, which the caller is expected to have already held
    /// back for `delay_hint` (racing that wait against shutdown, so a job
    /// is never stuck sleeping deaf to shutdown). `InMemorySyncQueue` pushes
    /// immediately; durable backends may instead stamp `delay_hint` as a
    /// visibility timestamp for callers that restart before it elapses.
    async fn requeue(&self, job: SyncJob, delay_hint: Duration) -> Result<(), SyncError>;
    async fn len(&self) -> usize;
}

/// In-memory FIFO with a `Notify` to wake idle workers. The durable backing
/// (external KV store or WAL, per spec Non-goals) is an external
/// collaborator reached only through this trait.
pub struct InMemorySyncQueue {
    inner: Mutex<VecDeque<SyncJob>>,
    notify: Notify,
}

impl Default for InMemorySyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySyncQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl SyncQueue for InMemorySyncQueue {
    async fn push(&self, job: SyncJob) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().await;
        guard.push_back(job);
        metrics::QUEUE_DEPTH.set(guard.len() as f64);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Result<Option<SyncJob>, SyncError> {
        let mut guard = self.inner.lock().await;
        let job = guard.pop_front();
        metrics::QUEUE_DEPTH.set(guard.len() as f64);
        Ok(job)
    }

    async fn requeue(&self, job: SyncJob, _delay_hint: Duration) -> Result<(), SyncError> {
        let mut guard = self.inner.lock().await;
        guard.push_back(job);
        metrics::QUEUE_DEPTH.set(guard.len() as f64);
        self.notify.notify_one();
        Ok(())
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_state_is_terminal_on_completion() {
        let mut t = TargetState::new("n1", 10);
        assert!(!t.is_terminal());
        t.completed = true;
        assert!(t.is_terminal());
        assert!(!t.is_hard_failure());
    }

    #[test]
    fn target_state_is_hard_failure_when_exhausted() {
        let t = TargetState::new("n1", 0);
        assert!(t.is_terminal());
        assert!(t.is_hard_failure());
    }

    #[test]
    fn requeue_delay_is_linear_and_capped() {
        assert_eq!(requeue_delay(10, 10), Duration::from_secs(0));
        assert_eq!(requeue_delay(10, 5), Duration::from_secs(5));
        assert_eq!(requeue_delay(10, -50), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let q = InMemorySyncQueue::new();
        q.push(SyncJob::new("c1", "src", "sha1", SyncOp::Create, vec![]))
            .await
            .unwrap();
        q.push(SyncJob::new("c1", "src", "sha2", SyncOp::Create, vec![]))
            .await
            .unwrap();
        let first = q.pop().await.unwrap().unwrap();
        assert_eq!(first.sha512_hex, "sha1");
        let second = q.pop().await.unwrap().unwrap();
        assert_eq!(second.sha512_hex, "sha2");
        assert!(q.pop().await.unwrap().is_none());
    }
}
