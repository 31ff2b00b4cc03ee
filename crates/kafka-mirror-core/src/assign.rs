//! Starting offset resolution.
//!
//! For every partition of every requested topic the starting offset is, in
//! priority order, the partition's entry in a per-partition policy, the
//! topic's global offset, or the run's default sentinel.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::kafka::TopicMetadata;
use crate::offset_spec::TopicSpecSet;

/// Starting offset for every assigned partition, keyed by topic then
/// partition. Values may still be the `-1`/`-2` sentinels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OffsetAssignment {
    topics: BTreeMap<String, BTreeMap<i32, i64>>,
}

impl OffsetAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, topic: &str, partition: i32, offset: i64) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(partition, offset);
    }

    pub fn offset_of(&self, topic: &str, partition: i32) -> Option<i64> {
        self.topics.get(topic)?.get(&partition).copied()
    }

    /// Offsets assigned for one topic.
    pub fn topic(&self, topic: &str) -> Option<&BTreeMap<i32, i64>> {
        self.topics.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }

    /// Every `(topic, partition, offset)` in topic then partition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i32, i64)> {
        self.topics.iter().flat_map(|(topic, partitions)| {
            partitions
                .iter()
                .map(move |(partition, offset)| (topic.as_str(), *partition, *offset))
        })
    }

    pub fn partition_count(&self) -> usize {
        self.topics.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partition_count() == 0
    }
}

/// Resolve the starting offset of every partition of the requested topics.
///
/// `topics` is the source metadata after reconciliation; its partition count
/// is authoritative. Topics in `topics` that were not requested are ignored,
/// and per-partition entries beyond a topic's partition count have no effect.
pub fn assign_offsets(
    topics: &[TopicMetadata],
    specs: &TopicSpecSet,
    default_offset: i64,
) -> OffsetAssignment {
    let mut assignment = OffsetAssignment::new();

    for metadata in topics.iter().filter(|t| specs.contains(&t.name)) {
        let policy = specs.policy(&metadata.name);
        let count = metadata.partition_count();

        for partition in 0..count {
            let offset = policy.offset_of(partition).unwrap_or(default_offset);
            assignment.insert(&metadata.name, partition, offset);
        }

        debug!(
            "Assigned {} partition(s) of '{}' using policy '{}'",
            count, metadata.name, policy
        );
    }

    assignment
}
