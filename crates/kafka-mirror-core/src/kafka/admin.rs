//! Kafka Admin API implementation (CreateTopics, DeleteTopics).

use kafka_protocol::messages::{
    create_topics_request::{CreatableTopic, CreateTopicsRequest},
    ApiKey, CreateTopicsResponse, DeleteTopicsRequest, DeleteTopicsResponse, TopicName,
};
use kafka_protocol::protocol::StrBytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::KafkaClient;
use crate::error::{codes, KafkaError};
use crate::Result;

/// Configuration for a topic to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicToCreate {
    /// Topic name
    pub name: String,
    /// Number of partitions
    pub num_partitions: i32,
    /// Replication factor (-1 for broker default)
    pub replication_factor: i16,
}

impl TopicToCreate {
    /// Topic with the broker's default replication factor
    pub fn new(name: impl Into<String>, num_partitions: i32) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor: -1,
        }
    }
}

/// Result of creating a single topic
#[derive(Debug, Clone)]
pub struct CreateTopicResult {
    pub name: String,
    pub error_code: i16,
    pub error_message: Option<String>,
}

impl CreateTopicResult {
    /// Only a fresh creation counts; an existing topic means the sink did not
    /// converge to the planned layout.
    pub fn is_success(&self) -> bool {
        self.error_code == codes::NONE
    }

    pub fn already_exists(&self) -> bool {
        self.error_code == codes::TOPIC_ALREADY_EXISTS
    }

    /// The failure as a broker error, `None` on success
    pub fn to_error(&self) -> Option<KafkaError> {
        (!self.is_success()).then(|| KafkaError::BrokerError {
            code: self.error_code,
            message: format!(
                "Failed to create topic {}: {}",
                self.name,
                self.error_message.as_deref().unwrap_or("no message")
            ),
        })
    }
}

/// Result of deleting a single topic
#[derive(Debug, Clone)]
pub struct DeleteTopicResult {
    pub name: String,
    pub error_code: i16,
    pub error_message: Option<String>,
}

impl DeleteTopicResult {
    /// A topic that is already gone counts as deleted
    pub fn is_success(&self) -> bool {
        self.error_code == codes::NONE || self.error_code == codes::UNKNOWN_TOPIC_OR_PARTITION
    }

    /// The failure as a broker error, `None` on success
    pub fn to_error(&self) -> Option<KafkaError> {
        (!self.is_success()).then(|| KafkaError::BrokerError {
            code: self.error_code,
            message: format!(
                "Failed to delete topic {}: {}",
                self.name,
                self.error_message.as_deref().unwrap_or("no message")
            ),
        })
    }
}

/// Create multiple topics in the Kafka cluster.
///
/// Returns one result per topic; per-topic failures are reported in the
/// results rather than as an `Err`.
pub async fn create_topics(
    client: &KafkaClient,
    topics: Vec<TopicToCreate>,
    timeout_ms: i32,
) -> Result<Vec<CreateTopicResult>> {
    if topics.is_empty() {
        return Ok(Vec::new());
    }

    debug!("Creating {} topics", topics.len());

    let creatable_topics: Vec<CreatableTopic> = topics
        .iter()
        .map(|t| {
            CreatableTopic::default()
                .with_name(TopicName(StrBytes::from_string(t.name.clone())))
                .with_num_partitions(t.num_partitions)
                .with_replication_factor(t.replication_factor)
        })
        .collect();

    let request = CreateTopicsRequest::default()
        .with_topics(creatable_topics)
        .with_timeout_ms(timeout_ms)
        .with_validate_only(false);

    let response: CreateTopicsResponse = client.send_request(ApiKey::CreateTopics, request).await?;

    let mut results = Vec::with_capacity(topics.len());

    for topic_result in &response.topics {
        let name = topic_result.name.to_string();
        let error_code = topic_result.error_code;
        let error_message = topic_result.error_message.as_ref().map(|s| s.to_string());

        if error_code == codes::NONE {
            info!("Created topic: {}", name);
        } else {
            warn!(
                "Failed to create topic {}: error_code={}, message={:?}",
                name, error_code, error_message
            );
        }

        results.push(CreateTopicResult {
            name,
            error_code,
            error_message,
        });
    }

    Ok(results)
}

/// Delete multiple topics from the Kafka cluster.
///
/// Returns one result per topic, like [`create_topics`].
pub async fn delete_topics(
    client: &KafkaClient,
    topics: &[String],
    timeout_ms: i32,
) -> Result<Vec<DeleteTopicResult>> {
    if topics.is_empty() {
        return Ok(Vec::new());
    }

    debug!("Deleting {} topics", topics.len());

    let request = DeleteTopicsRequest::default()
        .with_topic_names(
            topics
                .iter()
                .map(|name| TopicName(StrBytes::from_string(name.clone())))
                .collect(),
        )
        .with_timeout_ms(timeout_ms);

    let response: DeleteTopicsResponse = client.send_request(ApiKey::DeleteTopics, request).await?;

    let mut results = Vec::with_capacity(topics.len());

    for topic_result in &response.responses {
        let name = topic_result
            .name
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_default();
        let error_code = topic_result.error_code;
        let error_message = topic_result.error_message.as_ref().map(|s| s.to_string());

        match error_code {
            codes::NONE => info!("Deleted topic: {}", name),
            codes::UNKNOWN_TOPIC_OR_PARTITION => debug!("Topic already absent: {}", name),
            _ => warn!(
                "Failed to delete topic {}: error_code={}, message={:?}",
                name, error_code, error_message
            ),
        }

        results.push(DeleteTopicResult {
            name,
            error_code,
            error_message,
        });
    }

    Ok(results)
}
