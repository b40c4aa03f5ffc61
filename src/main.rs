// src/main.rs

//! The main entry point for the DFS sync manager.

use anyhow::Result;
use dfs_sync_manager::config::Config;
use dfs_sync_manager::core::manager::SyncManager;
use dfs_sync_manager::server;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("dfs-sync-manager version {VERSION}");
        return ExitCode::SUCCESS;
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let config = match &config_path {
        Some(path) => Config::from_file(std::path::Path::new(path)),
        None => Config::from_env(),
    };

    let config = match config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(100);
        }
    };

    match runtime.block_on(run_app(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("manager runtime error: {e:#}");
            ExitCode::from(101)
        }
    }
}

async fn run_app(config: Config) -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    info!(
        bind_address = %config.bind_address,
        metrics_bind_address = %config.metrics_bind_address,
        worker_pool_size = config.worker_pool_size,
        "starting dfs-sync-manager"
    );

    // The registry, chunk index, sync queue, and RPC cache are the only
    // process-wide state; everything below is constructed once here and
    // cloned (as `Arc`s) into every worker.
    let manager = Arc::new(SyncManager::in_memory().with_target_retry_counter(config.target_retry_counter));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut workers = manager.spawn_workers(config.worker_pool_size, shutdown_tx.clone());

    let handshake_listener = {
        let manager = Arc::clone(&manager);
        let bind_address = config.bind_address.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { server::run(&bind_address, manager, shutdown_rx).await })
    };

    let metrics_server = {
        let manager = Arc::clone(&manager);
        let bind_address = config.metrics_bind_address.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(
            async move { server::metrics_server::run(&bind_address, manager, shutdown_rx).await },
        )
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(());

    while workers.join_next().await.is_some() {}

    if let Err(e) = handshake_listener.await? {
        error!(error = %e, "handshake listener exited with error");
    }
    if let Err(e) = metrics_server.await? {
        error!(error = %e, "metrics server exited with error");
    }

    Ok(())
}
