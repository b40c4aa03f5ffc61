// src/config.rs

//! Manages manager configuration: environment-variable bootstrap (per the
//! external interfaces contract) plus an optional TOML overlay for
//! operational convenience, in the style of `spineldb::config`'s
//! `RawConfig`/`Config`/`validate` separation.
//!
//! Every field the TOML overlay can set has an environment variable
//! equivalent, read with the exact names `original_source/data-node/main.go`
//! and `original_source/head-node/src/main.go` use, so the env-var contract
//! is never weakened by the overlay.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

fn default_bind_address() -> String {
    ":9400".to_string()
}

fn default_mongo_database() -> String {
    "2020-dfs".to_string()
}

fn default_metrics_bind_address() -> String {
    "127.0.0.1:9600".to_string()
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_target_retry_counter() -> i32 {
    crate::core::queue::DEFAULT_TARGET_COUNTER
}

fn default_rpc_call_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Raw, directly-deserialized shape of an optional TOML config file. Mongo
/// and Redis connection strings are intentionally not defaulted here: they
/// are required, and a missing value is only acceptable if the matching
/// environment variable supplies it.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub mongo_conn: Option<String>,
    #[serde(default)]
    pub mongo_database: Option<String>,
    #[serde(default)]
    pub redis_conn: Option<String>,
    #[serde(default)]
    pub metrics_bind_address: Option<String>,
    #[serde(default)]
    pub worker_pool_size: Option<usize>,
    #[serde(default)]
    pub target_retry_counter: Option<i32>,
    #[serde(default, with = "humantime_serde::option")]
    pub rpc_call_timeout: Option<Duration>,
}

/// Resolved, validated manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen endpoint for the data-node command protocol.
    pub bind_address: String,
    /// Connection string for the cluster/node registry's document store.
    pub mongo_conn: String,
    pub mongo_database: String,
    /// Connection string for the distributed mutex and sync queue backing.
    pub redis_conn: String,
    /// Secondary bind address serving `/healthz` and `/metrics`.
    pub metrics_bind_address: String,
    pub worker_pool_size: usize,
    pub target_retry_counter: i32,
    pub rpc_call_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("failed to read config file {path}: {source}")]
    FileRead { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    FileParse { path: String, source: toml::de::Error },
}

impl ConfigError {
    /// Maps to the manager's documented exit code range: config errors
    /// 10-20.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::MissingEnvVar(_) => 10,
            ConfigError::InvalidValue { .. } => 11,
            ConfigError::FileRead { .. } => 12,
            ConfigError::FileParse { .. } => 13,
        }
    }
}

impl Config {
    /// Resolves configuration purely from the environment, per the external
    /// interfaces contract. `BIND_ADDRESS` defaults to `:9400`;
    /// `MONGO_CONN` and `REDIS_CONN` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_raw(RawConfig::default())
    }

    /// Loads an optional TOML overlay, then applies environment variables
    /// on top (env always wins), and finally validates the result.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&contents).map_err(|source| ConfigError::FileParse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let bind_address = env_or("BIND_ADDRESS", raw.bind_address).unwrap_or_else(default_bind_address);
        let mongo_conn =
            env_or("MONGO_CONN", raw.mongo_conn).ok_or_else(|| ConfigError::MissingEnvVar("MONGO_CONN".into()))?;
        let mongo_database =
            env_or("MONGO_DATABASE", raw.mongo_database).unwrap_or_else(default_mongo_database);
        let redis_conn =
            env_or("REDIS_CONN", raw.redis_conn).ok_or_else(|| ConfigError::MissingEnvVar("REDIS_CONN".into()))?;
        let metrics_bind_address = env_or("METRICS_BIND_ADDRESS", raw.metrics_bind_address)
            .unwrap_or_else(default_metrics_bind_address);
        let worker_pool_size = env_parsed_or("WORKER_POOL_SIZE", raw.worker_pool_size, "worker_pool_size")?
            .unwrap_or_else(default_worker_pool_size);
        let target_retry_counter =
            env_parsed_or("TARGET_RETRY_COUNTER", raw.target_retry_counter, "target_retry_counter")?
                .unwrap_or_else(default_target_retry_counter);
        let rpc_call_timeout = env_duration_or("RPC_CALL_TIMEOUT", raw.rpc_call_timeout, "rpc_call_timeout")?
            .unwrap_or_else(default_rpc_call_timeout);

        let config = Config {
            bind_address,
            mongo_conn,
            mongo_database,
            redis_conn,
            metrics_bind_address,
            worker_pool_size,
            target_retry_counter,
            rpc_call_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bind_address".into(),
                reason: "cannot be empty".into(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_pool_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.target_retry_counter <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "target_retry_counter".into(),
                reason: "must be positive".into(),
            });
        }
        if self.metrics_bind_address == self.bind_address {
            warn!(
                "metrics_bind_address is identical to bind_address; this is almost certainly a misconfiguration"
            );
        }
        Ok(())
    }
}

/// Environment variable wins over the raw (TOML or default) value.
fn env_or(var: &str, raw: Option<String>) -> Option<String> {
    std::env::var(var).ok().or(raw)
}

/// Parses a human-friendly duration string (e.g. `"30s"`, `"1m"`) from the
/// environment, falling back to `raw` (already resolved from TOML, if any).
fn env_duration_or(
    var: &str,
    raw: Option<Duration>,
    field: &str,
) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(var) {
        Ok(val) => val
            .parse::<humantime::Duration>()
            .map(|d| Some(d.into()))
            .map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("could not parse environment variable {var} as a duration"),
            }),
        Err(_) => Ok(raw),
    }
}

fn env_parsed_or<T: std::str::FromStr>(
    var: &str,
    raw: Option<T>,
    field: &str,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                reason: format!("could not parse environment variable {var}"),
            }),
        Err(_) => Ok(raw),
    }
}
