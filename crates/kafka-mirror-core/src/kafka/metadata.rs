//! Kafka Metadata API implementation.

use kafka_protocol::messages::{ApiKey, MetadataRequest, MetadataResponse, TopicName};
use kafka_protocol::protocol::StrBytes;
use serde::Serialize;
use tracing::debug;

use super::KafkaClient;
use crate::Result;

/// Broker metadata
#[derive(Debug, Clone)]
pub struct BrokerMetadata {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl BrokerMetadata {
    /// `host:port` address of the broker
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Topic metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMetadata {
    pub name: String,
    pub is_internal: bool,
    /// Partitions ordered by partition id
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    /// Number of partitions of the topic
    pub fn partition_count(&self) -> i32 {
        self.partitions.len() as i32
    }
}

/// Partition metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionMetadata {
    pub partition_id: i32,
    pub leader_id: i32,
    pub replica_nodes: Vec<i32>,
    pub isr_nodes: Vec<i32>,
}

/// Brokers, controller and topics from one metadata response
#[derive(Debug, Clone)]
pub struct ClusterMetadata {
    pub brokers: Vec<BrokerMetadata>,
    /// Active controller, -1 when the broker did not report one
    pub controller_id: i32,
    pub topics: Vec<TopicMetadata>,
}

/// Fetch cluster metadata from the broker.
///
/// With `topics` set, only those topics are requested; topics the broker
/// reports with an error code (for example UNKNOWN_TOPIC_OR_PARTITION) are
/// left out of the result.
pub async fn fetch_metadata(
    client: &KafkaClient,
    topics: Option<&[String]>,
) -> Result<ClusterMetadata> {
    let request = match topics {
        Some(topic_names) => {
            let topic_list: Vec<_> = topic_names
                .iter()
                .map(|name| {
                    kafka_protocol::messages::metadata_request::MetadataRequestTopic::default()
                        .with_name(Some(TopicName(StrBytes::from_string(name.clone()))))
                })
                .collect();
            MetadataRequest::default()
                .with_topics(Some(topic_list))
                .with_allow_auto_topic_creation(false)
        }
        None => MetadataRequest::default()
            .with_topics(None)
            .with_allow_auto_topic_creation(false),
    };

    let response: MetadataResponse = client.send_request(ApiKey::Metadata, request).await?;

    let brokers: Vec<BrokerMetadata> = response
        .brokers
        .iter()
        .map(|broker| BrokerMetadata {
            node_id: broker.node_id.0,
            host: broker.host.to_string(),
            port: broker.port,
            rack: broker.rack.as_ref().map(|r| r.to_string()),
        })
        .collect();

    debug!(
        "Discovered {} brokers, controller {}",
        brokers.len(),
        response.controller_id.0
    );

    let topics: Vec<TopicMetadata> = response
        .topics
        .iter()
        .filter_map(|topic| {
            if topic.error_code != 0 {
                let name = topic.name.as_ref().map(|n| n.as_str()).unwrap_or("unknown");
                debug!("Topic {} has error code {}", name, topic.error_code);
                return None;
            }

            let name = topic.name.as_ref()?.to_string();

            let mut partitions: Vec<PartitionMetadata> = topic
                .partitions
                .iter()
                .map(|p| PartitionMetadata {
                    partition_id: p.partition_index,
                    leader_id: p.leader_id.0,
                    replica_nodes: p.replica_nodes.iter().map(|n| n.0).collect(),
                    isr_nodes: p.isr_nodes.iter().map(|n| n.0).collect(),
                })
                .collect();
            partitions.sort_by_key(|p| p.partition_id);

            Some(TopicMetadata {
                name,
                is_internal: topic.is_internal,
                partitions,
            })
        })
        .collect();

    debug!("Discovered {} topics", topics.len());

    Ok(ClusterMetadata {
        brokers,
        controller_id: response.controller_id.0,
        topics,
    })
}
