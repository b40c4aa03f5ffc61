// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the sync manager.
//!
//! Uses `lazy_static` so metrics are registered exactly once for the process
//! lifetime, regardless of how many workers reference them.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Sync queue / processor ---
    /// Total sync jobs that reached the DONE terminal state.
    pub static ref JOBS_DONE_TOTAL: CounterVec = register_counter_vec!(
        "dfs_sync_jobs_done_total",
        "Total sync jobs that completed (DONE), labeled by op.",
        &["op"]
    ).unwrap();
    /// Total sync jobs dropped after all targets exhausted their retry counter.
    pub static ref JOBS_DROPPED_TOTAL: CounterVec = register_counter_vec!(
        "dfs_sync_jobs_dropped_total",
        "Total sync jobs dropped after exhausting retries, labeled by op.",
        &["op"]
    ).unwrap();
    /// Total times a job was requeued, labeled by reason.
    pub static ref JOBS_REQUEUED_TOTAL: CounterVec = register_counter_vec!(
        "dfs_sync_jobs_requeued_total",
        "Total sync job requeues, labeled by reason (paralyzed, transient, shutdown).",
        &["reason"]
    ).unwrap();
    /// Total per-target retry counter decrements.
    pub static ref TARGET_RETRIES_TOTAL: Counter = register_counter!(
        "dfs_sync_target_retries_total",
        "Total per-target retry attempts across all jobs."
    ).unwrap();
    /// Number of sync jobs currently queued.
    pub static ref QUEUE_DEPTH: Gauge = register_gauge!(
        "dfs_sync_queue_depth",
        "Number of sync jobs currently queued."
    ).unwrap();

    // --- Cluster / arbitrator ---
    /// Whether a cluster is currently paralyzed (1) or not (0), labeled by cluster id.
    pub static ref CLUSTER_PARALYZED: GaugeVec = register_gauge_vec!(
        "dfs_cluster_paralyzed",
        "1 if the cluster is paralyzed, 0 otherwise.",
        &["cluster_id"]
    ).unwrap();
    /// Total master elections performed, labeled by cluster id.
    pub static ref ELECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "dfs_elections_total",
        "Total master elections performed, labeled by cluster id.",
        &["cluster_id"]
    ).unwrap();
    /// Total chunks that breached the configured replication window, as observed
    /// by the health endpoint (the head-node's 503-equivalent signal).
    pub static ref SYNC_WINDOW_BREACHED_TOTAL: Counter = register_counter!(
        "dfs_sync_window_breached_total",
        "Total chunks that failed to replicate within the configured window."
    ).unwrap();

    // --- Latency ---
    /// Histogram of per-target RPC latency in seconds.
    pub static ref RPC_LATENCY_SECONDS: Histogram = register_histogram!(
        "dfs_rpc_latency_seconds",
        "Latency of data-node RPC calls in seconds."
    ).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
