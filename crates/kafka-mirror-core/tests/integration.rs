//! Integration tests for kafka-mirror against real brokers.
//!
//! Each test starts a source and a sink Kafka container.
//!
//! Run with: `cargo test --test integration -- --ignored`

use bytes::Bytes;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::kafka::Kafka;
use tokio::time::{sleep, Duration};

use kafka_mirror_core::config::{KafkaConfig, MirrorOptions};
use kafka_mirror_core::kafka::{
    FetchOptions, KafkaClient, PartitionFetchRequest, ProduceOptions, TopicToCreate,
};
use kafka_mirror_core::{Config, Error, MirrorEngine, MirrorRecord, RecordHeader};

// ============================================================================
// Test Helpers
// ============================================================================

/// Start a Kafka container for testing
async fn start_kafka() -> ContainerAsync<Kafka> {
    Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container")
}

/// Get the bootstrap server address for a Kafka container
async fn get_bootstrap_server(container: &ContainerAsync<Kafka>) -> String {
    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(9093)
        .await
        .expect("Failed to get port");
    format!("{}:{}", host, port)
}

/// Wait for Kafka to be ready
async fn wait_for_kafka(bootstrap_server: &str) -> KafkaClient {
    let client = KafkaClient::new(KafkaConfig::new(vec![bootstrap_server.to_string()]));
    for _ in 0..30 {
        if client.connect().await.is_ok() && client.fetch_metadata(None).await.is_ok() {
            return client;
        }
        sleep(Duration::from_secs(1)).await;
    }
    panic!("Kafka did not become ready in time");
}

async fn create_topic(client: &KafkaClient, name: &str, partitions: i32) {
    let results = client
        .create_topics(vec![TopicToCreate::new(name, partitions)], 10_000)
        .await
        .expect("Failed to create topic");
    assert!(results.iter().all(|r| r.is_success()), "{:?}", results);
}

fn test_record(topic: &str, partition: i32, i: usize) -> MirrorRecord {
    MirrorRecord {
        topic: topic.to_string(),
        partition,
        offset: 0,
        key: Some(Bytes::from(format!("key-{}", i))),
        value: Some(Bytes::from(format!("value-{}-{}", partition, i))),
        headers: vec![RecordHeader::new("seq", Some(Bytes::from(i.to_string())))],
        timestamp: 1_700_000_000_000 + i as i64,
    }
}

async fn produce_records(client: &KafkaClient, topic: &str, partition: i32, count: usize) {
    let records = (0..count).map(|i| test_record(topic, partition, i)).collect();
    client
        .produce(topic, partition, records, &ProduceOptions::default())
        .await
        .expect("Failed to produce");
}

async fn fetch_all(client: &KafkaClient, topic: &str, partition: i32) -> Vec<MirrorRecord> {
    let request = PartitionFetchRequest {
        topic: topic.to_string(),
        partition,
        offset: 0,
    };
    let results = client
        .fetch(&[request], &FetchOptions::default())
        .await
        .expect("Failed to fetch");
    results.into_iter().flat_map(|r| r.records).collect()
}

async fn partition_count(client: &KafkaClient, topic: &str) -> Option<i32> {
    let names = vec![topic.to_string()];
    client
        .fetch_metadata(Some(&names))
        .await
        .ok()?
        .topics
        .into_iter()
        .find(|t| t.name == topic && !t.partitions.is_empty())
        .map(|t| t.partition_count())
}

fn mirror_config(source: &str, sink: &str, topics: &[&str]) -> Config {
    Config {
        source: KafkaConfig::new(vec![source.to_string()]),
        sink: KafkaConfig::new(vec![sink.to_string()]),
        topics: topics.iter().map(|s| s.to_string()).collect(),
        mirror: MirrorOptions {
            timeout_secs: 30,
            poll_interval_ms: 500,
            ..Default::default()
        },
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_mirror_recreates_sink_topic_and_copies_records() {
    let source_kafka = start_kafka().await;
    let sink_kafka = start_kafka().await;
    let source_server = get_bootstrap_server(&source_kafka).await;
    let sink_server = get_bootstrap_server(&sink_kafka).await;

    let source = wait_for_kafka(&source_server).await;
    let sink = wait_for_kafka(&sink_server).await;

    create_topic(&source, "orders", 3).await;
    create_topic(&sink, "orders", 1).await;
    for p in 0..3 {
        produce_records(&source, "orders", p, 10).await;
    }

    let engine =
        MirrorEngine::new(mirror_config(&source_server, &sink_server, &["orders@earliest"]))
            .expect("valid config");
    let shutdown = engine.shutdown_handle();

    let run = tokio::spawn(async move { engine.run().await });

    // wait until every partition has been mirrored
    let mut mirrored = 0;
    for _ in 0..60 {
        mirrored = 0;
        for p in 0..3 {
            mirrored += fetch_all(&sink, "orders", p).await.len();
        }
        if mirrored == 30 {
            break;
        }
        sleep(Duration::from_millis(500)).await;
    }
    let _ = shutdown.send(());

    let summary = run.await.unwrap().expect("mirror run failed");
    assert_eq!(mirrored, 30);
    assert_eq!(summary.reconciliation.deleted, vec!["orders".to_string()]);
    assert_eq!(partition_count(&sink, "orders").await, Some(3));

    for p in 0..3 {
        let records = fetch_all(&sink, "orders", p).await;
        let expected: Vec<MirrorRecord> = (0..10).map(|i| test_record("orders", p, i)).collect();
        assert_eq!(records.len(), expected.len());
        for (got, want) in records.iter().zip(&expected) {
            assert_eq!(got.key, want.key);
            assert_eq!(got.value, want.value);
            assert_eq!(got.headers, want.headers);
            assert_eq!(got.timestamp, want.timestamp);
        }
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_missing_source_topic_leaves_sink_untouched() {
    let source_kafka = start_kafka().await;
    let sink_kafka = start_kafka().await;
    let source_server = get_bootstrap_server(&source_kafka).await;
    let sink_server = get_bootstrap_server(&sink_kafka).await;

    let _source = wait_for_kafka(&source_server).await;
    let sink = wait_for_kafka(&sink_server).await;

    create_topic(&sink, "x", 2).await;
    produce_records(&sink, "x", 0, 3).await;

    let engine = MirrorEngine::new(mirror_config(&source_server, &sink_server, &["x"]))
        .expect("valid config");
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, Error::MissingTopics(ref missing) if missing == &["x".to_string()]));
    assert_eq!(partition_count(&sink, "x").await, Some(2));
    assert_eq!(fetch_all(&sink, "x", 0).await.len(), 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_plan_resolves_offsets_without_changes() {
    let source_kafka = start_kafka().await;
    let sink_kafka = start_kafka().await;
    let source_server = get_bootstrap_server(&source_kafka).await;
    let sink_server = get_bootstrap_server(&sink_kafka).await;

    let source = wait_for_kafka(&source_server).await;
    let sink = wait_for_kafka(&sink_server).await;

    create_topic(&source, "payments", 4).await;
    create_topic(&sink, "payments", 2).await;

    let engine = MirrorEngine::new(mirror_config(
        &source_server,
        &sink_server,
        &["payments@0:10,1:20"],
    ))
    .expect("valid config");
    let plan = engine.plan().await.expect("plan failed");

    assert_eq!(plan.reconciliation.topics_to_delete, vec!["payments".to_string()]);
    assert_eq!(plan.reconciliation.topics_to_create[0].num_partitions, 4);
    assert_eq!(plan.assignment.offset_of("payments", 1), Some(20));
    assert_eq!(plan.assignment.partition_count(), 4);
    assert_eq!(partition_count(&sink, "payments").await, Some(2));
}
