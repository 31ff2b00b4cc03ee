//! Broker capabilities the mirror engine is written against.
//!
//! The Kafka implementations live in [`crate::kafka`]; [`crate::memory`]
//! provides an in-process cluster with the same behaviour for tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::assign::OffsetAssignment;
use crate::error::KafkaError;
use crate::kafka::{ProduceResponse, TopicMetadata};
use crate::record::MirrorRecord;
use crate::Result;

/// Topic administration and metadata for one cluster.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Metadata for the named topics. Topics that do not exist are absent
    /// from the result rather than reported as errors.
    async fn list_topics(&self, names: &[String]) -> Result<Vec<TopicMetadata>>;

    /// Delete the named topics.
    async fn delete_topics(&self, names: &[String], timeout: Duration) -> Result<()>;

    /// Create a topic with `partitions` partitions and the broker's default
    /// replication factor.
    async fn create_topic(&self, name: &str, partitions: i32, timeout: Duration) -> Result<()>;
}

/// Exclusive reader on the source cluster.
#[async_trait]
pub trait SourceConsumer: Send {
    /// Replace the read position of every partition named in `assignment`.
    /// Sentinel offsets are resolved by the consumer.
    async fn assign_partitions(&mut self, assignment: &OffsetAssignment) -> Result<()>;

    /// Blocking pull bounded by the consumer's poll timeout.
    ///
    /// Partition-level failures come back inside the batch; an `Err` means
    /// the session is unusable.
    async fn poll_fetch(&mut self) -> Result<FetchBatch>;
}

/// Writer on the sink cluster.
#[async_trait]
pub trait SinkProducer: Send + Sync {
    /// Write `records`, in order, to `topic`/`partition`.
    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<MirrorRecord>,
    ) -> Result<ProduceResponse>;
}

/// Result of one poll: records in fetch order plus per-partition failures.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub records: Vec<MirrorRecord>,
    pub errors: Vec<PartitionFetchError>,
}

impl FetchBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.errors.is_empty()
    }
}

/// A fetch failure scoped to one partition.
#[derive(Debug, Clone)]
pub struct PartitionFetchError {
    pub topic: String,
    pub partition: i32,
    pub error: KafkaError,
}
