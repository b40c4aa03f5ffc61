// src/core/sync/processor.rs

//! Sync processor: the heart of the core. A fixed-size pool of worker tasks
//! consumes jobs and drives each through its lifecycle.
//!
//! Per-target fan-out uses structured concurrency (`tokio::task::JoinSet`,
//! joined before the job is marked `DONE`/`REQUEUED`), grounded on
//! `MasterMonitor::run`'s join-set pattern and `ReplicaWorker::run`'s
//! reconnect/backoff loop — never a detached spawn.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::core::errors::SyncError;
use crate::core::index::ChunkIndex;
use crate::core::metrics;
use crate::core::queue::{SyncJob, SyncOp, SyncQueue, TargetState, requeue_delay};
use crate::core::registry::{ClusterId, ClusterRegistry};
use crate::core::rpc::{DataNodeClient, NodeRpcCache, Status};

const PARALYSIS_REQUEUE_DELAY: Duration = Duration::from_millis(500);
const NOT_FOUND_MAX_ATTEMPTS: i32 = crate::core::queue::DEFAULT_TARGET_COUNTER;

/// How long a job may sit unconverged before it counts as a replication-window
/// breach. The head-node-facing signal this backs is reported as a gauge
/// rather than blocking anything here — breaching the window never changes
/// how a job is retried, only what `/metrics` reports.
const SYNC_WINDOW: chrono::Duration = chrono::Duration::seconds(30);

const WORKER_RESPAWN_INITIAL_DELAY: Duration = Duration::from_secs(1);
const WORKER_RESPAWN_MAX_DELAY: Duration = Duration::from_secs(30);

/// Outcome of one processing pass over a job, used by the worker loop to
/// decide the next action.
enum PassOutcome {
    Done,
    Requeue { job: SyncJob, delay: Duration },
    Dropped,
}

pub struct SyncProcessor {
    registry: Arc<dyn ClusterRegistry>,
    index: Arc<ChunkIndex>,
    queue: Arc<dyn SyncQueue>,
    rpc: Arc<NodeRpcCache>,
    /// Serializes create-before-delete dispatch for the same `(cluster, sha)`,
    /// per the ordering guarantee in the concurrency model.
    dispatch_latches: DashMap<(ClusterId, String), Arc<tokio::sync::Mutex<()>>>,
}

impl SyncProcessor {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        index: Arc<ChunkIndex>,
        queue: Arc<dyn SyncQueue>,
        rpc: Arc<NodeRpcCache>,
    ) -> Self {
        Self {
            registry,
            index,
            queue,
            rpc,
            dispatch_latches: DashMap::new(),
        }
    }

    fn latch_for(&self, cluster_id: &str, sha: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.dispatch_latches
            .entry((cluster_id.to_string(), sha.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Spawns `pool_size` supervised worker slots, each consuming jobs until
    /// `shutdown` fires. Returns the `JoinSet` so callers can await full
    /// drain. Each slot is a small supervisor loop (`supervise_worker`)
    /// rather than the worker itself, so a worker that panics is respawned
    /// instead of silently shrinking the pool.
    pub fn run_worker_pool(
        self: &Arc<Self>,
        pool_size: usize,
        shutdown: broadcast::Sender<()>,
    ) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            let processor = Arc::clone(self);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                processor.supervise_worker(worker_id, shutdown).await;
            });
        }
        workers
    }

    /// Runs `worker_loop` to completion, respawning it with the same
    /// exponential-backoff shape as
    /// `spineldb::core::replication::worker::ReplicaWorker::run` if it ever
    /// exits for a reason other than shutdown (in practice: a panic inside
    /// the loop body, surfaced here as the spawned task's `JoinError`). A
    /// clean return means `shutdown` fired and was handled, so the
    /// supervisor exits too rather than spawning a worker that will never
    /// see another shutdown value on its receiver.
    async fn supervise_worker(self: Arc<Self>, worker_id: usize, shutdown: broadcast::Sender<()>) {
        let mut backoff = WORKER_RESPAWN_INITIAL_DELAY;
        let mut shutdown_rx = shutdown.subscribe();

        loop {
            let processor = Arc::clone(&self);
            let mut worker_shutdown_rx = shutdown.subscribe();
            let handle = tokio::spawn(async move {
                processor.worker_loop(worker_id, &mut worker_shutdown_rx).await;
            });

            match handle.await {
                Ok(()) => return,
                Err(join_err) => {
                    error!(worker_id, error = %join_err, "sync worker panicked, respawning after backoff");
                }
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(WORKER_RESPAWN_MAX_DELAY);
        }
    }

    async fn worker_loop(&self, worker_id: usize, shutdown_rx: &mut broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(worker_id, "sync worker shutting down");
                    return;
                }
                popped = self.queue.pop() => {
                    match popped {
                        Ok(Some(job)) => {
                            if self.drive_job(job, shutdown_rx).await {
                                // A broadcast::Receiver only ever observes a given
                                // shutdown send once; drive_job already consumed
                                // it, so looping back to select on it again here
                                // would wait forever. Exit now instead.
                                info!(worker_id, "sync worker shutting down after in-flight job");
                                return;
                            }
                        }
                        Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                        Err(e) => {
                            error!(error = %e, "sync queue pop failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// Drives one job through NEW -> RUNNING -> (DONE | REQUEUED | DROPPED),
    /// re-enqueuing as needed. Cancellable mid-dispatch or mid-backoff by
    /// `shutdown_rx`: the original job (not partial progress) is requeued
    /// whole, per the shutdown-mid-job scenario. Returns `true` if shutdown
    /// was observed, so the caller knows not to select on `shutdown_rx`
    /// again (it only fires once per receiver).
    async fn drive_job(&self, job: SyncJob, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let op_label = match job.op {
            SyncOp::Create => "create",
            SyncOp::Delete => "delete",
        };
        let mut shutdown_observed = false;

        // `self.run_pass(job)` builds its future (and so moves `job` into it)
        // as soon as `select!` constructs the branches, before either one
        // has actually been chosen — so the shutdown branch needs its own
        // copy of `job` to fall back to rather than reusing the moved-from
        // original.
        let job_for_shutdown = job.clone();
        let outcome = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                warn!(sha = %job_for_shutdown.sha512_hex, cluster_id = %job_for_shutdown.cluster_id, "shutdown mid-job, requeuing whole job");
                metrics::JOBS_REQUEUED_TOTAL.with_label_values(&["shutdown"]).inc();
                shutdown_observed = true;
                PassOutcome::Requeue { job: job_for_shutdown, delay: Duration::from_secs(0) }
            }
            outcome = self.run_pass(job) => outcome,
        };

        match outcome {
            PassOutcome::Done => {
                metrics::JOBS_DONE_TOTAL.with_label_values(&[op_label]).inc();
            }
            PassOutcome::Dropped => {
                metrics::JOBS_DROPPED_TOTAL.with_label_values(&[op_label]).inc();
            }
            PassOutcome::Requeue { job, delay } => {
                // Race the backoff against shutdown rather than sleeping
                // deaf to it (the sleep itself used to live inside
                // InMemorySyncQueue::requeue, with no such race).
                if !shutdown_observed && !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => {
                            warn!(sha = %job.sha512_hex, cluster_id = %job.cluster_id, "shutdown during requeue backoff, requeuing immediately");
                            shutdown_observed = true;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if let Err(e) = self.queue.requeue(job, Duration::from_secs(0)).await {
                    error!(error = %e, "failed to requeue sync job");
                }
            }
        }

        shutdown_observed
    }

    async fn run_pass(&self, mut job: SyncJob) -> PassOutcome {
        let sha = job.sha512_hex.clone();
        let cluster_id = job.cluster_id.clone();
        let latch = self.latch_for(&cluster_id, &sha);
        let _latch_guard = latch.lock().await;

        let cluster = match self.registry.get_cluster(&cluster_id).await {
            Ok(c) => c,
            Err(SyncError::ClusterNotFound(_)) => {
                error!(sha = %sha, cluster_id = %cluster_id, "cluster not found, dropping job");
                return PassOutcome::Dropped;
            }
            Err(e) => {
                warn!(sha = %sha, cluster_id = %cluster_id, error = %e, "failed to load cluster, requeuing");
                return PassOutcome::Requeue {
                    job,
                    delay: requeue_delay(NOT_FOUND_MAX_ATTEMPTS, NOT_FOUND_MAX_ATTEMPTS - 1),
                };
            }
        };

        if !job.window_breach_recorded && Utc::now() - job.enqueued_at >= SYNC_WINDOW {
            job.window_breach_recorded = true;
            metrics::SYNC_WINDOW_BREACHED_TOTAL.inc();
            warn!(sha = %sha, cluster_id = %cluster_id, "job aged past the replication window, unconverged");
        }

        if cluster.paralyzed {
            metrics::JOBS_REQUEUED_TOTAL
                .with_label_values(&["paralyzed"])
                .inc();
            return PassOutcome::Requeue {
                job,
                delay: PARALYSIS_REQUEUE_DELAY,
            };
        }

        if job.targets.is_empty() {
            return PassOutcome::Done;
        }

        let mut joins: JoinSet<TargetState> = JoinSet::new();
        for target in std::mem::take(&mut job.targets) {
            let node_address = cluster
                .node(&target.node)
                .map(|n| n.address.clone())
                .unwrap_or_default();
            let rpc = Arc::clone(&self.rpc);
            let index = Arc::clone(&self.index);
            let sha = sha.clone();
            let source_address = job.source_address.clone();
            let op = job.op;
            joins.spawn(async move {
                dispatch_target(rpc, index, target, &node_address, &sha, &source_address, op).await
            });
        }

        let mut targets = Vec::new();
        while let Some(res) = joins.join_next().await {
            match res {
                Ok(t) => targets.push(t),
                Err(join_err) => error!(error = %join_err, "sync target task panicked"),
            }
        }

        targets.retain(|t| {
            if t.is_hard_failure() {
                warn!(sha = %sha, cluster_id = %cluster_id, node_id = %t.node, op = op_name(job.op), "target exhausted retries, dropping from job");
                metrics::TARGET_RETRIES_TOTAL.inc();
                false
            } else {
                !t.completed
            }
        });

        job.targets = targets;
        if job.targets.is_empty() {
            PassOutcome::Done
        } else {
            let min_counter = job
                .targets
                .iter()
                .map(|t| t.counter)
                .min()
                .unwrap_or(crate::core::queue::DEFAULT_TARGET_COUNTER);
            metrics::JOBS_REQUEUED_TOTAL
                .with_label_values(&["transient"])
                .inc();
            PassOutcome::Requeue {
                job,
                delay: requeue_delay(crate::core::queue::DEFAULT_TARGET_COUNTER, min_counter),
            }
        }
    }
}

fn op_name(op: SyncOp) -> &'static str {
    match op {
        SyncOp::Create => "create",
        SyncOp::Delete => "delete",
    }
}

/// Executes one target's replication attempt. Never panics: all failure
/// paths decrement the counter and return the (still incomplete) state.
async fn dispatch_target(
    rpc: Arc<NodeRpcCache>,
    index: Arc<ChunkIndex>,
    mut target: TargetState,
    node_address: &str,
    sha: &str,
    source_address: &str,
    op: SyncOp,
) -> TargetState {
    if node_address.is_empty() {
        target.counter -= 1;
        return target;
    }
    let client = rpc.get(&target.node, node_address);

    let started = Instant::now();
    let result = match op {
        SyncOp::Create => run_create(client.as_ref(), &index, sha, source_address, &target.node).await,
        SyncOp::Delete => run_delete(client.as_ref(), &index, sha, &target.node).await,
    };
    metrics::RPC_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());

    match result {
        Ok(()) => target.completed = true,
        Err(e) => {
            if matches!(e, SyncError::NodeUnreachable(_) | SyncError::RpcTimeout { .. }) {
                rpc.evict(&target.node);
            }
            target.counter -= 1;
        }
    }
    target
}

async fn run_create(
    client: &dyn DataNodeClient,
    index: &ChunkIndex,
    sha: &str,
    source_address: &str,
    node_id: &str,
) -> Result<(), SyncError> {
    let status = client.sync_create(sha, source_address).await?;
    if status != Status::Ok {
        return Err(SyncError::Protocol(format!("SYCR returned {status:?}")));
    }
    index.add_node_to_chunk(sha, node_id);
    Ok(())
}

async fn run_delete(
    client: &dyn DataNodeClient,
    index: &ChunkIndex,
    sha: &str,
    node_id: &str,
) -> Result<(), SyncError> {
    let status = client.sync_delete(sha).await?;
    if status != Status::Ok && status != Status::NotFound {
        return Err(SyncError::Protocol(format!("SYDL returned {status:?}")));
    }
    index.remove_node_from_chunk(sha, node_id);
    Ok(())
}
