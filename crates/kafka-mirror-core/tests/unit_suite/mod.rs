//! Unit tests for kafka-mirror-core.
//!
//! Scenarios run against `MemoryCluster`, with tokio's paused clock standing
//! in for metadata propagation delays.

pub mod engine;
pub mod helpers;
pub mod mirror;
pub mod offsets;
pub mod reconcile;
