//! Topic spec parsing and offset assignment.
//!
//! Tests for:
//! - Spec rendering and re-parsing
//! - Priority of per-partition, global and default offsets
//! - Coverage of every partition index

use kafka_mirror_core::kafka::{PartitionMetadata, TopicMetadata};
use kafka_mirror_core::{
    assign_offsets, parse_topic_spec, Error, TopicOffsetPolicy, TopicSpecSet, EARLIEST_OFFSET,
    LATEST_OFFSET,
};

fn topic(name: &str, partitions: i32) -> TopicMetadata {
    TopicMetadata {
        name: name.to_string(),
        is_internal: false,
        partitions: (0..partitions)
            .map(|id| PartitionMetadata {
                partition_id: id,
                leader_id: 1,
                replica_nodes: vec![1],
                isr_nodes: vec![1],
            })
            .collect(),
    }
}

#[test]
fn test_rendered_specs_parse_to_same_offsets() {
    let specs = [
        "orders",
        "payments@5",
        "audit@earliest",
        "clicks@0:10,1:latest,4:beginning",
    ];
    let parsed = TopicSpecSet::parse(specs).unwrap();
    let reparsed = TopicSpecSet::parse(parsed.to_specs()).unwrap();
    assert_eq!(parsed, reparsed);

    let metadata = [
        topic("orders", 2),
        topic("payments", 3),
        topic("audit", 1),
        topic("clicks", 6),
    ];
    assert_eq!(
        assign_offsets(&metadata, &parsed, LATEST_OFFSET),
        assign_offsets(&metadata, &reparsed, LATEST_OFFSET)
    );
}

#[test]
fn test_single_partition_global_offset() {
    let specs = TopicSpecSet::parse(["orders@5"]).unwrap();
    let assignment = assign_offsets(&[topic("orders", 1)], &specs, LATEST_OFFSET);
    assert_eq!(assignment.offset_of("orders", 0), Some(5));
}

#[test]
fn test_per_partition_offsets_with_default_for_the_rest() {
    let specs = TopicSpecSet::parse(["orders@0:10,1:20"]).unwrap();
    let assignment = assign_offsets(&[topic("orders", 3)], &specs, EARLIEST_OFFSET);
    assert_eq!(assignment.offset_of("orders", 0), Some(10));
    assert_eq!(assignment.offset_of("orders", 1), Some(20));
    assert_eq!(assignment.offset_of("orders", 2), Some(EARLIEST_OFFSET));
}

#[test]
fn test_every_partition_is_assigned() {
    let specs = TopicSpecSet::parse(["orders@0:3,7:9", "payments@latest", "audit"]).unwrap();
    let metadata = [topic("orders", 12), topic("payments", 4), topic("audit", 2)];
    let assignment = assign_offsets(&metadata, &specs, EARLIEST_OFFSET);

    for t in &metadata {
        for p in 0..t.partition_count() {
            assert!(
                assignment.offset_of(&t.name, p).is_some(),
                "{}:{} not assigned",
                t.name,
                p
            );
        }
        assert!(assignment.offset_of(&t.name, t.partition_count()).is_none());
    }
    assert_eq!(assignment.partition_count(), 18);
}

#[test]
fn test_per_partition_entry_beyond_partition_count_is_ignored() {
    let specs = TopicSpecSet::parse(["orders@9:100"]).unwrap();
    let assignment = assign_offsets(&[topic("orders", 2)], &specs, LATEST_OFFSET);
    assert_eq!(assignment.partition_count(), 2);
    assert_eq!(assignment.offset_of("orders", 9), None);
}

#[test]
fn test_range_token_is_rejected() {
    let err = parse_topic_spec("orders@0-10").unwrap_err();
    match err {
        Error::Format { token, .. } => assert_eq!(token, "0-10"),
        other => panic!("expected Format, got {other}"),
    }
}

#[test]
fn test_bare_topic_uses_default_policy() {
    let spec = parse_topic_spec("orders").unwrap();
    assert_eq!(spec.topic, "orders");
    assert_eq!(spec.policy, TopicOffsetPolicy::Default);
}
