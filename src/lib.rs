//! Reviewflow - execution and resilience layer for batches of review jobs
//!
//! Decides whether a batch runs sequentially or in parallel, tracks
//! per-target progress in an ordered queue, caches analysis results by
//! content fingerprint, and classifies and retries failures.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod mode;
pub mod queue;
pub mod runner;
