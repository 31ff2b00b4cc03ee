//! End-to-end engine runs over in-memory clusters.

use std::sync::Arc;
use std::time::Duration;

use kafka_mirror_core::memory::{MemoryCluster, MemoryConsumer, Operation};
use kafka_mirror_core::{Endpoints, Error, MirrorEngine, EARLIEST_OFFSET, LATEST_OFFSET};

use super::helpers::{cluster_with, engine_config, fill_partition, values};

fn endpoints(source: &Arc<MemoryCluster>, sink: &Arc<MemoryCluster>) -> Endpoints {
    Endpoints {
        source_admin: source.clone(),
        sink_admin: sink.clone(),
        consumer: Box::new(MemoryConsumer::new(Arc::clone(source))),
        producer: sink.clone(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_recreates_sink_and_mirrors_from_spec_offsets() {
    let source = cluster_with(&[("orders", 5), ("payments", 1)]);
    let sink = cluster_with(&[("orders", 3)]);
    fill_partition(&sink, "orders", 0, "stale", 3);
    for p in 0..5 {
        fill_partition(&source, "orders", p, &format!("o{}", p), 4);
    }
    fill_partition(&source, "payments", 0, "pay", 6);

    let engine = MirrorEngine::new(engine_config(&["orders@0:2,3:earliest", "payments@4"])).unwrap();
    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = shutdown.send(());
    });

    let summary = engine.run_with(endpoints(&source, &sink)).await.unwrap();

    assert_eq!(sink.partition_count("orders"), Some(5));
    assert_eq!(sink.partition_count("payments"), Some(1));

    assert_eq!(summary.assignment.offset_of("orders", 0), Some(2));
    assert_eq!(summary.assignment.offset_of("orders", 3), Some(EARLIEST_OFFSET));
    assert_eq!(summary.assignment.offset_of("orders", 1), Some(LATEST_OFFSET));
    assert_eq!(summary.assignment.offset_of("payments", 0), Some(4));

    assert_eq!(values(&sink, "orders", 0), vec!["o0-2", "o0-3"]);
    assert_eq!(values(&sink, "orders", 3).len(), 4);
    assert!(values(&sink, "orders", 1).is_empty());
    assert_eq!(values(&sink, "payments", 0), vec!["pay-4", "pay-5"]);
    assert_eq!(summary.metrics.records_forwarded, 8);
}

#[tokio::test(start_paused = true)]
async fn test_missing_topic_aborts_before_mirroring() {
    let source = cluster_with(&[("orders", 1)]);
    let sink = cluster_with(&[("orders", 1)]);

    let engine = MirrorEngine::new(engine_config(&["orders", "x"])).unwrap();
    let err = engine.run_with(endpoints(&source, &sink)).await.unwrap_err();

    assert!(matches!(err, Error::MissingTopics(ref missing) if missing == &["x".to_string()]));
    assert!(sink.history().is_empty());
    assert_eq!(source.calls(Operation::Fetch), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_reconciliation_stops_after_seeding() {
    let source = cluster_with(&[("orders", 1)]);
    fill_partition(&source, "orders", 0, "v", 2);
    let sink = Arc::new(MemoryCluster::with_propagation_lag(Duration::from_secs(2)));

    let engine = MirrorEngine::new(engine_config(&["orders@earliest"])).unwrap();
    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = shutdown.send(());
    });

    let summary = engine.run_with(endpoints(&source, &sink)).await.unwrap();

    assert_eq!(sink.partition_count("orders"), Some(1));
    assert_eq!(summary.metrics.polls, 0);
    assert!(sink.records("orders", 0).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_plan_reports_without_touching_sink() {
    let source = cluster_with(&[("orders", 5)]);
    let sink = cluster_with(&[("orders", 3)]);

    let engine = MirrorEngine::new(engine_config(&["orders@0:10,1:20"])).unwrap();
    let plan = engine.plan_with(source.clone(), sink.clone()).await.unwrap();

    assert_eq!(plan.reconciliation.topics_to_delete, vec!["orders".to_string()]);
    assert_eq!(plan.assignment.offset_of("orders", 0), Some(10));
    assert_eq!(plan.assignment.offset_of("orders", 1), Some(20));
    assert_eq!(plan.assignment.offset_of("orders", 4), Some(LATEST_OFFSET));
    assert!(sink.history().is_empty());

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["assignment"]["orders"]["0"], 10);
    assert_eq!(json["reconciliation"]["topics_to_create"][0]["num_partitions"], 5);
}
