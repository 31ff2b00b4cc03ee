//! Test helper utilities.
//!
//! Provides cluster fixtures and configuration builders used across the
//! scenario tests.

use std::sync::Arc;
use std::time::Duration;

use kafka_mirror_core::config::{KafkaConfig, MirrorOptions, RunConfig};
use kafka_mirror_core::memory::MemoryCluster;
use kafka_mirror_core::{ClusterAdmin, Config, TopicReconciler, TopicSpecSet};

/// Parse topic specs into a run configuration with a 10s timeout and 1s
/// convergence polling.
pub fn run_config(specs: &[&str]) -> RunConfig {
    let topics = TopicSpecSet::parse(specs).expect("valid topic specs");
    RunConfig::new(topics, Duration::from_secs(10))
}

/// Same as [`run_config`] with an explicit timeout.
pub fn run_config_with_timeout(specs: &[&str], timeout: Duration) -> RunConfig {
    let topics = TopicSpecSet::parse(specs).expect("valid topic specs");
    RunConfig::new(topics, timeout)
}

/// A cluster holding `topics` as `(name, partitions)` pairs.
pub fn cluster_with(topics: &[(&str, i32)]) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    for (name, partitions) in topics {
        cluster.add_topic(name, *partitions);
    }
    cluster
}

/// Append `count` records with values `"<prefix>-<i>"` to one partition.
pub fn fill_partition(cluster: &MemoryCluster, topic: &str, partition: i32, prefix: &str, count: usize) {
    for i in 0..count {
        let value = format!("{}-{}", prefix, i);
        cluster
            .append(topic, partition, Some(prefix.as_bytes()), Some(value.as_bytes()))
            .expect("partition exists");
    }
}

pub fn reconciler(
    source: &Arc<MemoryCluster>,
    sink: &Arc<MemoryCluster>,
    config: RunConfig,
) -> TopicReconciler {
    let source: Arc<dyn ClusterAdmin> = source.clone();
    let sink: Arc<dyn ClusterAdmin> = sink.clone();
    TopicReconciler::new(source, sink, config)
}

/// Engine configuration for the given topic specs. The bootstrap addresses
/// are never contacted by the in-memory scenarios.
pub fn engine_config(specs: &[&str]) -> Config {
    Config {
        source: KafkaConfig::new(vec!["source:9092".to_string()]),
        sink: KafkaConfig::new(vec!["sink:9092".to_string()]),
        topics: specs.iter().map(|s| s.to_string()).collect(),
        mirror: MirrorOptions {
            timeout_secs: 10,
            poll_interval_ms: 1000,
            ..Default::default()
        },
    }
}

/// Values stored in a partition, as UTF-8 strings
pub fn values(cluster: &MemoryCluster, topic: &str, partition: i32) -> Vec<String> {
    cluster
        .records(topic, partition)
        .iter()
        .filter_map(|r| r.value.as_ref())
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .collect()
}
