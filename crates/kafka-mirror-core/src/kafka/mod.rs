//! Kafka protocol client implementation.

mod admin;
mod client;
mod consumer;
mod fetch;
mod metadata;
mod partition_router;
mod produce;
mod producer;
mod scram;
mod tls;

pub use admin::{CreateTopicResult, DeleteTopicResult, TopicToCreate};
pub use client::KafkaClient;
pub use consumer::KafkaSourceConsumer;
pub use fetch::{FetchOptions, PartitionFetchRequest, PartitionFetchResult};
pub use metadata::{BrokerMetadata, ClusterMetadata, PartitionMetadata, TopicMetadata};
pub use partition_router::PartitionLeaderRouter;
pub use produce::{ProduceOptions, ProduceResponse};
pub use producer::KafkaSinkProducer;
pub use scram::ScramAlgorithm;
