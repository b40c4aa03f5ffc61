// src/core/sync/mod.rs

//! Sync processor: drives each job through fan-out, retry, index update,
//! and completion.

pub mod processor;

pub use processor::SyncProcessor;
