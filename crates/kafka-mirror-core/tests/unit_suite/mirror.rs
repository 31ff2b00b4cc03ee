//! Mirror loop scenarios against the in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kafka_mirror_core::error::codes;
use kafka_mirror_core::memory::{MemoryCluster, MemoryConsumer};
use kafka_mirror_core::{
    DeliveryMode, KafkaError, MirrorLoop, MirrorRecord, MirrorSettings, MirrorState,
    OffsetAssignment, RecordHeader, SinkProducer, EARLIEST_OFFSET, LATEST_OFFSET,
};
use tokio::sync::broadcast;

use super::helpers::{cluster_with, fill_partition, values};

fn settings(delivery: DeliveryMode) -> MirrorSettings {
    MirrorSettings {
        delivery,
        max_batch_bytes: 64 * 1024,
        forward_queue_capacity: 4,
        report_interval: Duration::from_secs(30),
    }
}

/// Send a shutdown signal after `after` of (paused) time.
fn stop_after(after: Duration) -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = tx.send(());
    });
    rx
}

#[tokio::test(start_paused = true)]
async fn test_records_land_in_same_partition_in_order() {
    let source = cluster_with(&[("orders", 3)]);
    let sink = cluster_with(&[("orders", 3)]);
    for p in 0..3 {
        fill_partition(&source, "orders", p, &format!("p{}", p), 20);
    }

    let mut assignment = OffsetAssignment::new();
    for p in 0..3 {
        assignment.insert("orders", p, EARLIEST_OFFSET);
    }

    let consumer = MemoryConsumer::new(Arc::clone(&source)).with_max_records(7);
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::BestEffort),
    );

    let report = mirror
        .run(&assignment, stop_after(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(report.records_forwarded, 60);
    for p in 0..3 {
        assert_eq!(values(&sink, "orders", p), values(&source, "orders", p));
    }
}

#[tokio::test(start_paused = true)]
async fn test_explicit_offsets_skip_earlier_records() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("orders", 2)]);
    fill_partition(&source, "orders", 0, "a", 10);
    fill_partition(&source, "orders", 1, "b", 10);

    let mut assignment = OffsetAssignment::new();
    assignment.insert("orders", 0, 7);
    assignment.insert("orders", 1, LATEST_OFFSET);

    let consumer = MemoryConsumer::new(Arc::clone(&source));
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::Acknowledged),
    );

    let feeder = {
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            source.append("orders", 1, None, Some(b"fresh")).unwrap();
        })
    };

    mirror
        .run(&assignment, stop_after(Duration::from_secs(1)))
        .await
        .unwrap();
    feeder.await.unwrap();

    assert_eq!(values(&sink, "orders", 0), vec!["a-7", "a-8", "a-9"]);
    assert_eq!(values(&sink, "orders", 1), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn test_record_contents_are_forwarded_unmodified() {
    let source = Arc::new(MemoryCluster::new());
    source.add_topic("orders", 1);
    let sink = cluster_with(&[("orders", 1)]);

    // seed the source through its producer side so headers survive
    let original = MirrorRecord {
        topic: "orders".to_string(),
        partition: 0,
        offset: 0,
        key: Some(Bytes::from_static(b"id-1")),
        value: None,
        headers: vec![
            RecordHeader::new("trace", Some(Bytes::from_static(b"abc"))),
            RecordHeader::new("empty", None),
        ],
        timestamp: 1_650_000_000_000,
    };
    source
        .produce("orders", 0, vec![original.clone()])
        .await
        .unwrap();

    let mut assignment = OffsetAssignment::new();
    assignment.insert("orders", 0, EARLIEST_OFFSET);

    let consumer = MemoryConsumer::new(Arc::clone(&source));
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::BestEffort),
    );
    mirror
        .run(&assignment, stop_after(Duration::from_secs(1)))
        .await
        .unwrap();

    let mirrored = sink.records("orders", 0);
    assert_eq!(mirrored, vec![original]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_partition_resets_and_continues() {
    let source = cluster_with(&[("orders", 1)]);
    let sink = cluster_with(&[("orders", 1)]);
    fill_partition(&source, "orders", 0, "v", 10);
    source.truncate_before("orders", 0, 8).unwrap();

    let mut assignment = OffsetAssignment::new();
    assignment.insert("orders", 0, 3);

    let consumer = MemoryConsumer::new(Arc::clone(&source));
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::Acknowledged),
    );
    let report = mirror
        .run(&assignment, stop_after(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(report.fetch_errors, 1);
    assert_eq!(values(&sink, "orders", 0), vec!["v-8", "v-9"]);
    assert_eq!(mirror.state(), MirrorState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_missing_sink_partition_drops_batch_but_keeps_running() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("orders", 1)]);
    fill_partition(&source, "orders", 0, "a", 2);
    fill_partition(&source, "orders", 1, "b", 3);

    let mut assignment = OffsetAssignment::new();
    assignment.insert("orders", 0, EARLIEST_OFFSET);
    assignment.insert("orders", 1, EARLIEST_OFFSET);

    let consumer = MemoryConsumer::new(Arc::clone(&source));
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::BestEffort),
    );
    let report = mirror
        .run(&assignment, stop_after(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(report.produce_errors, 1);
    assert_eq!(report.records_dropped, 3);
    assert_eq!(report.records_forwarded, 2);
    assert_eq!(values(&sink, "orders", 0), vec!["a-0", "a-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_leader_change_is_reported_per_partition() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("orders", 2)]);
    fill_partition(&source, "orders", 0, "a", 1);
    fill_partition(&source, "orders", 1, "b", 1);
    source.fail_partition(
        "orders",
        1,
        KafkaError::BrokerError {
            code: codes::NOT_LEADER_OR_FOLLOWER,
            message: "leader moved".to_string(),
        },
    );

    let mut assignment = OffsetAssignment::new();
    assignment.insert("orders", 0, EARLIEST_OFFSET);
    assignment.insert("orders", 1, EARLIEST_OFFSET);

    let consumer = MemoryConsumer::new(Arc::clone(&source));
    let mut mirror = MirrorLoop::new(
        Box::new(consumer),
        sink.clone(),
        settings(DeliveryMode::Acknowledged),
    );
    let report = mirror
        .run(&assignment, stop_after(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(report.fetch_errors, 1);
    assert_eq!(values(&sink, "orders", 0), vec!["a-0"]);
    assert_eq!(values(&sink, "orders", 1), vec!["b-0"]);
}
