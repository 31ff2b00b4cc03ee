//! Partition leader routing for multi-broker Kafka clusters.
//!
//! Fetch, ListOffsets and Produce must reach the partition leader, and
//! CreateTopics/DeleteTopics must reach the controller. The router keeps a
//! connection per broker and a leader map refreshed from metadata.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::broker::ClusterAdmin;
use crate::config::KafkaConfig;
use crate::error::{codes, KafkaError};
use crate::record::MirrorRecord;
use crate::Result;

use super::admin::{CreateTopicResult, DeleteTopicResult, TopicToCreate};
use super::fetch::{FetchOptions, PartitionFetchRequest, PartitionFetchResult};
use super::metadata::{BrokerMetadata, ClusterMetadata, TopicMetadata};
use super::produce::{ProduceOptions, ProduceResponse};
use super::KafkaClient;

/// Produce attempts before a leadership error is returned to the caller
const PRODUCE_ATTEMPTS: u32 = 3;

/// Base delay between produce attempts, multiplied by the attempt number
const PRODUCE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Routes Kafka requests to partition leaders and the controller.
pub struct PartitionLeaderRouter {
    /// Kafka configuration (for creating new connections)
    config: KafkaConfig,

    /// Map of broker_id -> BrokerMetadata (host:port info)
    broker_metadata: RwLock<HashMap<i32, BrokerMetadata>>,

    /// Map of (topic, partition) -> leader broker_id
    partition_leaders: RwLock<HashMap<(String, i32), i32>>,

    /// Active controller, -1 when unknown
    controller_id: AtomicI32,

    /// Connection pool: broker_id -> KafkaClient
    connections: RwLock<HashMap<i32, Arc<KafkaClient>>>,

    /// Bootstrap client for metadata operations
    bootstrap_client: Arc<KafkaClient>,
}

impl PartitionLeaderRouter {
    /// Connect to the bootstrap servers and load the initial cluster layout.
    pub async fn new(config: KafkaConfig) -> Result<Self> {
        let bootstrap_client = Arc::new(KafkaClient::new(config.clone()));
        bootstrap_client.connect().await?;

        let router = Self {
            config,
            broker_metadata: RwLock::new(HashMap::new()),
            partition_leaders: RwLock::new(HashMap::new()),
            controller_id: AtomicI32::new(-1),
            connections: RwLock::new(HashMap::new()),
            bootstrap_client,
        };

        router.refresh_metadata().await?;

        Ok(router)
    }

    /// Refresh brokers, controller and every partition leader.
    pub async fn refresh_metadata(&self) -> Result<()> {
        debug!("Refreshing cluster metadata");

        let metadata = self.bootstrap_client.fetch_metadata(None).await?;

        {
            let mut leaders = self.partition_leaders.write().await;
            leaders.clear();
        }
        self.apply_metadata(&metadata).await;

        info!(
            "Refreshed metadata: {} brokers, controller {}, {} topics",
            metadata.brokers.len(),
            metadata.controller_id,
            metadata.topics.len()
        );

        Ok(())
    }

    /// Refresh leaders for the given topics only.
    pub async fn refresh_topics(&self, topics: &[String]) -> Result<()> {
        debug!("Refreshing leaders for {:?}", topics);

        let metadata = self.bootstrap_client.fetch_metadata(Some(topics)).await?;
        self.apply_metadata(&metadata).await;

        Ok(())
    }

    async fn apply_metadata(&self, metadata: &ClusterMetadata) {
        {
            let mut brokers = self.broker_metadata.write().await;
            for broker in &metadata.brokers {
                brokers.insert(broker.node_id, broker.clone());
            }
        }

        self.controller_id
            .store(metadata.controller_id, Ordering::SeqCst);

        let mut leaders = self.partition_leaders.write().await;
        for topic in &metadata.topics {
            for partition in &topic.partitions {
                let key = (topic.name.clone(), partition.partition_id);
                if partition.leader_id < 0 {
                    leaders.remove(&key);
                } else {
                    leaders.insert(key, partition.leader_id);
                }
            }
        }
    }

    /// Cached leader for a partition, if any
    pub async fn cached_leader(&self, topic: &str, partition: i32) -> Option<i32> {
        let leaders = self.partition_leaders.read().await;
        leaders.get(&(topic.to_string(), partition)).copied()
    }

    /// Leader for a partition, refreshing the topic's metadata on a miss.
    pub async fn get_leader(&self, topic: &str, partition: i32) -> Result<i32> {
        if let Some(leader) = self.cached_leader(topic, partition).await {
            return Ok(leader);
        }

        self.refresh_topics(&[topic.to_string()]).await?;

        self.cached_leader(topic, partition).await.ok_or_else(|| {
            KafkaError::PartitionNotAvailable {
                topic: topic.to_string(),
                partition,
            }
            .into()
        })
    }

    /// Drop a cached leader so the next request looks it up again.
    pub async fn forget_leader(&self, topic: &str, partition: i32) {
        let mut leaders = self.partition_leaders.write().await;
        leaders.remove(&(topic.to_string(), partition));
    }

    async fn forget_topics(&self, topics: &[String]) {
        let mut leaders = self.partition_leaders.write().await;
        leaders.retain(|(topic, _), _| !topics.contains(topic));
    }

    /// Get or create a connection to a specific broker.
    async fn get_broker_connection(&self, broker_id: i32) -> Result<Arc<KafkaClient>> {
        {
            let connections = self.connections.read().await;
            if let Some(client) = connections.get(&broker_id) {
                return Ok(Arc::clone(client));
            }
        }

        let broker_addr = {
            let brokers = self.broker_metadata.read().await;
            brokers
                .get(&broker_id)
                .map(BrokerMetadata::address)
                .ok_or_else(|| KafkaError::Protocol(format!("Unknown broker ID: {}", broker_id)))?
        };

        debug!(
            "Creating new connection to broker {} at {}",
            broker_id, broker_addr
        );

        let mut broker_config = self.config.clone();
        broker_config.bootstrap_servers = vec![broker_addr];

        let client = Arc::new(KafkaClient::new(broker_config));
        client.connect().await?;

        let mut connections = self.connections.write().await;
        let client = connections.entry(broker_id).or_insert(client);
        Ok(Arc::clone(client))
    }

    /// Get a client connected to the partition's leader broker.
    pub async fn get_leader_client(&self, topic: &str, partition: i32) -> Result<Arc<KafkaClient>> {
        let leader_id = self.get_leader(topic, partition).await?;
        self.get_broker_connection(leader_id).await
    }

    /// Client for the active controller, or the bootstrap connection when
    /// the controller is unknown.
    pub async fn controller_client(&self) -> Result<Arc<KafkaClient>> {
        let controller_id = self.controller_id.load(Ordering::SeqCst);
        if controller_id < 0 {
            return Ok(Arc::clone(&self.bootstrap_client));
        }

        match self.get_broker_connection(controller_id).await {
            Ok(client) => Ok(client),
            Err(e) => {
                warn!(
                    "Controller {} unreachable ({}), using bootstrap connection",
                    controller_id, e
                );
                Ok(Arc::clone(&self.bootstrap_client))
            }
        }
    }

    /// Fetch from many partitions, one request per leader, leaders in
    /// parallel.
    ///
    /// Partition and per-broker failures are returned inside the results and
    /// invalidate the affected leaders. `Err` means cluster metadata itself
    /// could not be loaded.
    pub async fn fetch(
        &self,
        requests: &[PartitionFetchRequest],
        options: &FetchOptions,
    ) -> Result<Vec<PartitionFetchResult>> {
        let mut unknown = BTreeSet::new();
        for request in requests {
            if self
                .cached_leader(&request.topic, request.partition)
                .await
                .is_none()
            {
                unknown.insert(request.topic.clone());
            }
        }
        if !unknown.is_empty() {
            let unknown: Vec<String> = unknown.into_iter().collect();
            self.refresh_topics(&unknown).await?;
        }

        let mut results = Vec::with_capacity(requests.len());
        let mut by_leader: HashMap<i32, Vec<PartitionFetchRequest>> = HashMap::new();

        for request in requests {
            match self.cached_leader(&request.topic, request.partition).await {
                Some(leader) => by_leader.entry(leader).or_default().push(request.clone()),
                None => results.push(PartitionFetchResult::failed(
                    request,
                    KafkaError::BrokerError {
                        code: codes::LEADER_NOT_AVAILABLE,
                        message: format!(
                            "No leader for {}:{}",
                            request.topic, request.partition
                        ),
                    },
                )),
            }
        }

        let fetches = by_leader.into_iter().map(|(leader, partitions)| async move {
            let outcome = match self.get_broker_connection(leader).await {
                Ok(client) => client.fetch(&partitions, options).await,
                Err(e) => Err(e),
            };
            (leader, partitions, outcome)
        });

        for (leader, partitions, outcome) in join_all(fetches).await {
            match outcome {
                Ok(partition_results) => {
                    for result in &partition_results {
                        let stale = result
                            .error
                            .as_ref()
                            .and_then(KafkaError::code)
                            .is_some_and(is_leadership_code);
                        if stale {
                            self.forget_leader(&result.topic, result.partition).await;
                        }
                    }
                    results.extend(partition_results);
                }
                Err(e) => {
                    warn!(
                        "Fetch from broker {} for {} partition(s) failed: {}",
                        leader,
                        partitions.len(),
                        e
                    );
                    let error = into_kafka_error(e);
                    for request in &partitions {
                        self.forget_leader(&request.topic, request.partition).await;
                        results.push(PartitionFetchResult::failed(request, error.clone()));
                    }
                }
            }
        }

        Ok(results)
    }

    /// Resolve a ListOffsets timestamp against the partition leader.
    pub async fn list_offset(&self, topic: &str, partition: i32, timestamp: i64) -> Result<i64> {
        match self.list_offset_internal(topic, partition, timestamp).await {
            Err(e) if is_not_leader_error(&e) => {
                warn!(
                    "Leadership changed for {}/{} during list_offset, refreshing metadata",
                    topic, partition
                );
                self.forget_leader(topic, partition).await;
                self.list_offset_internal(topic, partition, timestamp).await
            }
            other => other,
        }
    }

    async fn list_offset_internal(
        &self,
        topic: &str,
        partition: i32,
        timestamp: i64,
    ) -> Result<i64> {
        let client = self.get_leader_client(topic, partition).await?;
        client.list_offset(topic, partition, timestamp).await
    }

    /// Produce records to a partition, routing to the current leader.
    ///
    /// Leadership errors (common right after a topic is created) refresh the
    /// leader and retry with a short backoff.
    pub async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<MirrorRecord>,
        options: &ProduceOptions,
    ) -> Result<ProduceResponse> {
        let mut attempt = 1;
        loop {
            let outcome = match self.get_leader_client(topic, partition).await {
                Ok(client) => {
                    client
                        .produce(topic, partition, records.clone(), options)
                        .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Err(e) if attempt < PRODUCE_ATTEMPTS && is_not_leader_error(&e) => {
                    warn!(
                        "Leadership error producing to {}/{} (attempt {}): {}",
                        topic, partition, attempt, e
                    );
                    self.forget_leader(topic, partition).await;
                    tokio::time::sleep(PRODUCE_RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Fetch metadata using the bootstrap client.
    pub async fn fetch_metadata(&self, topics: Option<&[String]>) -> Result<ClusterMetadata> {
        self.bootstrap_client.fetch_metadata(topics).await
    }

    /// Create topics on the controller, retrying once if the controller moved.
    pub async fn controller_create_topics(
        &self,
        topics: Vec<TopicToCreate>,
        timeout_ms: i32,
    ) -> Result<Vec<CreateTopicResult>> {
        let results = self
            .controller_client()
            .await?
            .create_topics(topics.clone(), timeout_ms)
            .await?;

        if results.iter().any(|r| r.error_code == codes::NOT_CONTROLLER) {
            warn!("Controller moved during CreateTopics, retrying");
            self.refresh_metadata().await?;
            return self
                .controller_client()
                .await?
                .create_topics(topics, timeout_ms)
                .await;
        }

        Ok(results)
    }

    /// Delete topics on the controller, retrying once if the controller moved.
    pub async fn controller_delete_topics(
        &self,
        topics: &[String],
        timeout_ms: i32,
    ) -> Result<Vec<DeleteTopicResult>> {
        let results = self
            .controller_client()
            .await?
            .delete_topics(topics, timeout_ms)
            .await?;

        if results.iter().any(|r| r.error_code == codes::NOT_CONTROLLER) {
            warn!("Controller moved during DeleteTopics, retrying");
            self.refresh_metadata().await?;
            return self
                .controller_client()
                .await?
                .delete_topics(topics, timeout_ms)
                .await;
        }

        Ok(results)
    }
}

#[async_trait]
impl ClusterAdmin for PartitionLeaderRouter {
    async fn list_topics(&self, names: &[String]) -> Result<Vec<TopicMetadata>> {
        let metadata = self.fetch_metadata(Some(names)).await?;
        Ok(metadata
            .topics
            .into_iter()
            .filter(|t| names.contains(&t.name))
            .collect())
    }

    async fn delete_topics(&self, names: &[String], timeout: Duration) -> Result<()> {
        let results = self
            .controller_delete_topics(names, timeout_ms(timeout))
            .await?;
        self.forget_topics(names).await;

        match results.iter().find_map(DeleteTopicResult::to_error) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn create_topic(&self, name: &str, partitions: i32, timeout: Duration) -> Result<()> {
        let results = self
            .controller_create_topics(vec![TopicToCreate::new(name, partitions)], timeout_ms(timeout))
            .await?;
        self.forget_topics(&[name.to_string()]).await;

        let result = results.iter().find(|r| r.name == name).ok_or_else(|| {
            KafkaError::Protocol(format!("No CreateTopics result for {}", name))
        })?;

        match result.to_error() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

fn timeout_ms(timeout: Duration) -> i32 {
    i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX)
}

/// Error codes after which the cached leader must not be reused
fn is_leadership_code(code: i16) -> bool {
    matches!(
        code,
        codes::NOT_LEADER_OR_FOLLOWER
            | codes::LEADER_NOT_AVAILABLE
            | codes::UNKNOWN_TOPIC_OR_PARTITION
            | codes::FENCED_LEADER_EPOCH
    )
}

/// Check if an error means the request went to the wrong (or no) leader.
fn is_not_leader_error(error: &crate::Error) -> bool {
    match error {
        crate::Error::Kafka(KafkaError::BrokerError { code, .. }) => is_leadership_code(*code),
        crate::Error::Kafka(KafkaError::PartitionNotAvailable { .. }) => true,
        _ => false,
    }
}

fn into_kafka_error(error: crate::Error) -> KafkaError {
    match error {
        crate::Error::Kafka(e) => e,
        other => KafkaError::Protocol(other.to_string()),
    }
}
