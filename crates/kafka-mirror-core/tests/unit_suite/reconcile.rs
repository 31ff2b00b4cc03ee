//! Topic reconciliation scenarios.
//!
//! Covers:
//! - Convergence to the source's partition layout
//! - Idempotence of repeated runs
//! - The missing-topic guard
//! - Convergence timeouts and admin failures

use std::time::Duration;

use kafka_mirror_core::error::codes;
use kafka_mirror_core::memory::{AdminEvent, MemoryCluster, Operation};
use kafka_mirror_core::{ConvergencePhase, Error, KafkaError};

use super::helpers::{cluster_with, fill_partition, reconciler, run_config, run_config_with_timeout};

#[tokio::test(start_paused = true)]
async fn test_sink_topic_grows_to_source_partition_count() {
    let source = cluster_with(&[("orders", 5)]);
    let sink = cluster_with(&[("orders", 3)]);
    fill_partition(&sink, "orders", 0, "stale", 4);

    let report = reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap();

    assert_eq!(sink.partition_count("orders"), Some(5));
    assert!(sink.records("orders", 0).is_empty());
    assert_eq!(report.deleted, vec!["orders".to_string()]);
    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].num_partitions, 5);
    assert_eq!(
        sink.history(),
        vec![
            AdminEvent::Deleted("orders".to_string()),
            AdminEvent::Created {
                name: "orders".to_string(),
                partitions: 5
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sink_topic_shrinks_to_source_partition_count() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("orders", 8)]);

    reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap();

    assert_eq!(sink.partition_count("orders"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_absent_sink_topic_is_created_without_deletion() {
    let source = cluster_with(&[("orders", 4), ("payments", 1)]);
    let sink = cluster_with(&[("payments", 1)]);

    let report = reconciler(&source, &sink, run_config(&["orders", "payments"]))
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.deleted, vec!["payments".to_string()]);
    assert_eq!(sink.partition_count("orders"), Some(4));
    assert_eq!(sink.partition_count("payments"), Some(1));
    assert_eq!(
        report
            .source_topics
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>(),
        vec!["orders", "payments"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unrequested_sink_topics_are_untouched() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("audit", 3)]);
    fill_partition(&sink, "audit", 1, "keep", 2);

    reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap();

    assert_eq!(sink.partition_count("audit"), Some(3));
    assert_eq!(sink.records("audit", 1).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_is_idempotent() {
    let source = cluster_with(&[("orders", 5), ("payments", 2)]);
    let sink = cluster_with(&[("orders", 3)]);
    let specs = ["orders@earliest", "payments"];

    reconciler(&source, &sink, run_config(&specs))
        .reconcile()
        .await
        .unwrap();
    let first = (sink.partition_count("orders"), sink.partition_count("payments"));

    reconciler(&source, &sink, run_config(&specs))
        .reconcile()
        .await
        .unwrap();
    let second = (sink.partition_count("orders"), sink.partition_count("payments"));

    assert_eq!(first, (Some(5), Some(2)));
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_missing_source_topic_leaves_sink_unchanged() {
    let source = cluster_with(&[("orders", 1)]);
    let sink = cluster_with(&[("orders", 1), ("x", 2)]);

    let err = reconciler(&source, &sink, run_config(&["x", "orders", "y"]))
        .reconcile()
        .await
        .unwrap_err();

    match err {
        Error::MissingTopics(missing) => {
            assert_eq!(missing, vec!["x".to_string(), "y".to_string()])
        }
        other => panic!("expected MissingTopics, got {other}"),
    }
    assert!(sink.history().is_empty());
    assert_eq!(sink.calls(Operation::DeleteTopics), 0);
    assert_eq!(sink.calls(Operation::CreateTopic), 0);
    assert_eq!(sink.partition_count("x"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_metadata_propagation() {
    let source = cluster_with(&[("orders", 3)]);
    let sink = std::sync::Arc::new(MemoryCluster::with_propagation_lag(Duration::from_secs(3)));
    sink.add_topic("orders", 1);

    let start = tokio::time::Instant::now();
    reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap();

    // deletion becomes visible after 3s and creation 3s after that
    assert!(start.elapsed() >= Duration::from_secs(6));
    assert!(sink.calls(Operation::ListTopics) > 3);
    assert_eq!(sink.partition_count("orders"), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_deletion_that_never_converges_times_out() {
    let source = cluster_with(&[("orders", 3)]);
    let sink = std::sync::Arc::new(MemoryCluster::with_propagation_lag(Duration::from_secs(60)));
    sink.add_topic("orders", 1);

    let err = reconciler(
        &source,
        &sink,
        run_config_with_timeout(&["orders"], Duration::from_secs(5)),
    )
    .reconcile()
    .await
    .unwrap_err();

    match err {
        Error::ConvergenceTimeout {
            phase,
            pending,
            timeout,
        } => {
            assert_eq!(phase, ConvergencePhase::Deletion);
            assert_eq!(pending, vec!["orders".to_string()]);
            assert_eq!(timeout, Duration::from_secs(5));
        }
        other => panic!("expected ConvergenceTimeout, got {other}"),
    }
    assert_eq!(sink.calls(Operation::CreateTopic), 0);
}

#[tokio::test(start_paused = true)]
async fn test_creation_that_never_converges_times_out() {
    let source = cluster_with(&[("orders", 3)]);
    let sink = std::sync::Arc::new(MemoryCluster::new());

    // visible only long after the deadline
    sink.set_propagation_lag(Duration::from_secs(60));

    let err = reconciler(
        &source,
        &sink,
        run_config_with_timeout(&["orders"], Duration::from_secs(4)),
    )
    .reconcile()
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        Error::ConvergenceTimeout {
            phase: ConvergencePhase::Creation,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_metadata_check_counts_as_not_converged() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[]);

    // plan's sink lookup succeeds, the first convergence check fails
    let config = run_config(&["orders"]);
    let reconciler = reconciler(&source, &sink, config);
    let (_, plan) = reconciler.plan().await.unwrap();

    sink.fail_next(
        Operation::ListTopics,
        KafkaError::Timeout("metadata".to_string()),
    );
    reconciler.execute(&plan).await.unwrap();

    assert_eq!(sink.partition_count("orders"), Some(2));
    assert_eq!(sink.calls(Operation::ListTopics), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_is_fatal() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[]);
    sink.fail_next(
        Operation::CreateTopic,
        KafkaError::BrokerError {
            code: codes::INVALID_REPLICATION_FACTOR,
            message: "Replication factor 3 larger than available brokers 1".to_string(),
        },
    );

    let err = reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Kafka(KafkaError::BrokerError {
            code: codes::INVALID_REPLICATION_FACTOR,
            ..
        })
    ));
    assert_eq!(sink.partition_count("orders"), None);
}

#[tokio::test(start_paused = true)]
async fn test_source_metadata_failure_is_fatal() {
    let source = cluster_with(&[("orders", 2)]);
    let sink = cluster_with(&[("orders", 1)]);
    source.fail_next(Operation::ListTopics, KafkaError::NoBrokersAvailable);

    let err = reconciler(&source, &sink, run_config(&["orders"]))
        .reconcile()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Kafka(KafkaError::NoBrokersAvailable)));
    assert!(sink.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_plan_does_not_mutate_sink() {
    let source = cluster_with(&[("orders", 5)]);
    let sink = cluster_with(&[("orders", 3)]);

    let (source_topics, plan) = reconciler(&source, &sink, run_config(&["orders"]))
        .plan()
        .await
        .unwrap();

    assert_eq!(source_topics[0].partition_count(), 5);
    assert_eq!(plan.topics_to_delete, vec!["orders".to_string()]);
    assert_eq!(plan.topics_to_create[0].num_partitions, 5);
    assert_eq!(plan.topics_to_create[0].replication_factor, -1);
    assert!(sink.history().is_empty());
    assert_eq!(sink.partition_count("orders"), Some(3));
}
