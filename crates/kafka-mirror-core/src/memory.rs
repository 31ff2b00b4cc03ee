//! In-process cluster implementing the broker traits.
//!
//! `MemoryCluster` keeps topics and partition logs in memory and can lag its
//! metadata behind admin changes the way a real cluster's brokers do, which
//! makes the reconciler's convergence polling observable in tests. Failures
//! are injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::assign::OffsetAssignment;
use crate::broker::{ClusterAdmin, FetchBatch, PartitionFetchError, SinkProducer, SourceConsumer};
use crate::error::{codes, KafkaError};
use crate::kafka::{PartitionMetadata, ProduceResponse, TopicMetadata};
use crate::offset_spec::{StartOffset, EARLIEST_OFFSET, LATEST_OFFSET};
use crate::record::MirrorRecord;
use crate::{Error, Result};

/// Operations that accept injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListTopics,
    DeleteTopics,
    CreateTopic,
    Produce,
    Fetch,
}

/// Administrative change applied to the cluster, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    Deleted(String),
    Created { name: String, partitions: i32 },
}

#[derive(Debug, Default)]
struct PartitionLog {
    log_start: i64,
    records: Vec<MirrorRecord>,
}

impl PartitionLog {
    fn log_end(&self) -> i64 {
        self.log_start + self.records.len() as i64
    }
}

#[derive(Debug)]
struct MemoryTopic {
    partitions: Vec<PartitionLog>,
    /// Metadata lists the topic from this instant on
    visible_from: Instant,
}

#[derive(Debug, Default)]
struct ClusterState {
    topics: BTreeMap<String, MemoryTopic>,
    /// Deleted topics metadata keeps listing until the instant passes
    deleting: BTreeMap<String, (i32, Instant)>,
    propagation_lag: Duration,
    faults: HashMap<Operation, VecDeque<KafkaError>>,
    partition_faults: HashMap<(String, i32), VecDeque<KafkaError>>,
    history: Vec<AdminEvent>,
    calls: HashMap<Operation, usize>,
}

impl ClusterState {
    fn enter(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn visible_topic(&self, name: &str, now: Instant) -> Option<TopicMetadata> {
        let partition_count = match (self.topics.get(name), self.deleting.get(name)) {
            (Some(topic), _) if topic.visible_from <= now => topic.partitions.len() as i32,
            (_, Some((count, hidden_from))) if *hidden_from > now => *count,
            _ => return None,
        };

        Some(TopicMetadata {
            name: name.to_string(),
            is_internal: false,
            partitions: (0..partition_count)
                .map(|id| PartitionMetadata {
                    partition_id: id,
                    leader_id: 0,
                    replica_nodes: vec![0],
                    isr_nodes: vec![0],
                })
                .collect(),
        })
    }

    fn partition(&self, topic: &str, partition: i32) -> Option<&PartitionLog> {
        self.topics
            .get(topic)?
            .partitions
            .get(usize::try_from(partition).ok()?)
    }

    fn partition_mut(&mut self, topic: &str, partition: i32) -> Option<&mut PartitionLog> {
        self.topics
            .get_mut(topic)?
            .partitions
            .get_mut(usize::try_from(partition).ok()?)
    }
}

fn unknown_partition(topic: &str, partition: i32) -> KafkaError {
    KafkaError::BrokerError {
        code: codes::UNKNOWN_TOPIC_OR_PARTITION,
        message: format!("{}:{} does not exist", topic, partition),
    }
}

/// In-memory broker cluster.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster whose metadata reflects creations and deletions only after
    /// `lag` has passed.
    pub fn with_propagation_lag(lag: Duration) -> Self {
        let cluster = Self::new();
        cluster.set_propagation_lag(lag);
        cluster
    }

    pub fn set_propagation_lag(&self, lag: Duration) {
        self.state.lock().propagation_lag = lag;
    }

    /// Create a topic that is visible immediately, bypassing admin history.
    pub fn add_topic(&self, name: &str, partitions: i32) {
        let mut state = self.state.lock();
        state.deleting.remove(name);
        state.topics.insert(
            name.to_string(),
            MemoryTopic {
                partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
                visible_from: Instant::now(),
            },
        );
    }

    /// Append a record and return its offset.
    pub fn append(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<i64> {
        let mut state = self.state.lock();
        let log = state
            .partition_mut(topic, partition)
            .ok_or_else(|| unknown_partition(topic, partition))?;

        let offset = log.log_end();
        log.records.push(MirrorRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(Bytes::copy_from_slice),
            value: value.map(Bytes::copy_from_slice),
            headers: Vec::new(),
            timestamp: 1_700_000_000_000 + offset,
        });
        Ok(offset)
    }

    /// Drop records before `offset`, as retention would.
    pub fn truncate_before(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        let log = state
            .partition_mut(topic, partition)
            .ok_or_else(|| unknown_partition(topic, partition))?;

        let drop = (offset - log.log_start).clamp(0, log.records.len() as i64) as usize;
        log.records.drain(..drop);
        log.log_start += drop as i64;
        Ok(())
    }

    /// Records currently stored in a partition
    pub fn records(&self, topic: &str, partition: i32) -> Vec<MirrorRecord> {
        self.state
            .lock()
            .partition(topic, partition)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    /// `(log start, log end)` of a partition
    pub fn offsets(&self, topic: &str, partition: i32) -> Option<(i64, i64)> {
        self.state
            .lock()
            .partition(topic, partition)
            .map(|log| (log.log_start, log.log_end()))
    }

    /// Actual partition count, regardless of metadata lag
    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.partitions.len() as i32)
    }

    /// Names of existing topics, regardless of metadata lag
    pub fn topic_names(&self) -> Vec<String> {
        self.state.lock().topics.keys().cloned().collect()
    }

    /// Make the next call of `op` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Operation, error: KafkaError) {
        self.state
            .lock()
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Report `error` for a partition on the next fetch that includes it.
    pub fn fail_partition(&self, topic: &str, partition: i32, error: KafkaError) {
        self.state
            .lock()
            .partition_faults
            .entry((topic.to_string(), partition))
            .or_default()
            .push_back(error);
    }

    /// Creations and deletions in call order
    pub fn history(&self) -> Vec<AdminEvent> {
        self.state.lock().history.clone()
    }

    /// How often `op` was called, including failed calls
    pub fn calls(&self, op: Operation) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn resolve_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<i64> {
        let (start, end) = self
            .offsets(topic, partition)
            .ok_or_else(|| unknown_partition(topic, partition))?;
        Ok(match offset {
            EARLIEST_OFFSET => start,
            LATEST_OFFSET => end,
            explicit => explicit,
        })
    }
}

#[async_trait]
impl ClusterAdmin for MemoryCluster {
    async fn list_topics(&self, names: &[String]) -> Result<Vec<TopicMetadata>> {
        let mut state = self.state.lock();
        state.enter(Operation::ListTopics)?;

        let now = Instant::now();
        Ok(names
            .iter()
            .filter_map(|name| state.visible_topic(name, now))
            .collect())
    }

    async fn delete_topics(&self, names: &[String], _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(Operation::DeleteTopics)?;

        let hidden_from = Instant::now() + state.propagation_lag;
        for name in names {
            // Deleting an absent topic is reported as UNKNOWN_TOPIC_OR_PARTITION,
            // which admin clients treat as done
            if let Some(topic) = state.topics.remove(name) {
                let count = topic.partitions.len() as i32;
                state.deleting.insert(name.clone(), (count, hidden_from));
                state.history.push(AdminEvent::Deleted(name.clone()));
            }
        }
        Ok(())
    }

    async fn create_topic(&self, name: &str, partitions: i32, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(Operation::CreateTopic)?;

        if state.topics.contains_key(name) {
            return Err(KafkaError::BrokerError {
                code: codes::TOPIC_ALREADY_EXISTS,
                message: format!("Topic '{}' already exists", name),
            }
            .into());
        }
        if partitions <= 0 {
            return Err(KafkaError::BrokerError {
                code: codes::INVALID_PARTITIONS,
                message: format!("Invalid partition count {}", partitions),
            }
            .into());
        }

        let visible_from = Instant::now() + state.propagation_lag;
        state.deleting.remove(name);
        state.topics.insert(
            name.to_string(),
            MemoryTopic {
                partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
                visible_from,
            },
        );
        state.history.push(AdminEvent::Created {
            name: name.to_string(),
            partitions,
        });
        Ok(())
    }
}

#[async_trait]
impl SinkProducer for MemoryCluster {
    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<MirrorRecord>,
    ) -> Result<ProduceResponse> {
        let mut state = self.state.lock();
        state.enter(Operation::Produce)?;

        let log = state
            .partition_mut(topic, partition)
            .ok_or_else(|| unknown_partition(topic, partition))?;

        let base_offset = log.log_end();
        let record_count = records.len();
        for (i, record) in records.into_iter().enumerate() {
            log.records.push(MirrorRecord {
                offset: base_offset + i as i64,
                ..record
            });
        }

        Ok(ProduceResponse {
            base_offset,
            error_code: codes::NONE,
            record_count,
        })
    }
}

/// Consumer reading from a [`MemoryCluster`] with explicit positions.
pub struct MemoryConsumer {
    cluster: Arc<MemoryCluster>,
    positions: BTreeMap<(String, i32), i64>,
    max_records: usize,
    poll_timeout: Duration,
    offset_reset: StartOffset,
}

impl MemoryConsumer {
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            cluster,
            positions: BTreeMap::new(),
            max_records: 500,
            poll_timeout: Duration::from_millis(100),
            offset_reset: StartOffset::Earliest,
        }
    }

    /// Records returned per partition per poll
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Time an empty poll blocks before returning
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_offset_reset(mut self, offset_reset: StartOffset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    /// Next offset that will be fetched for a partition
    pub fn position(&self, topic: &str, partition: i32) -> Option<i64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    fn poll_partition(
        &mut self,
        topic: &str,
        partition: i32,
        batch: &mut FetchBatch,
    ) -> std::result::Result<(), KafkaError> {
        let key = (topic.to_string(), partition);

        let injected = self
            .cluster
            .state
            .lock()
            .partition_faults
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            return Err(error);
        }

        let position = self.positions.get(&key).copied().unwrap_or(0);
        let (start, end) = self
            .cluster
            .offsets(topic, partition)
            .ok_or_else(|| unknown_partition(topic, partition))?;

        if position < start || position > end {
            if let Ok(reset) = self
                .cluster
                .resolve_offset(topic, partition, self.offset_reset.sentinel())
            {
                self.positions.insert(key, reset);
            }
            return Err(KafkaError::BrokerError {
                code: codes::OFFSET_OUT_OF_RANGE,
                message: format!("Offset {} outside [{}, {}]", position, start, end),
            });
        }

        let records: Vec<MirrorRecord> = self
            .cluster
            .records(topic, partition)
            .into_iter()
            .filter(|r| r.offset >= position)
            .take(self.max_records)
            .collect();

        if let Some(last) = records.last() {
            self.positions.insert(key, last.offset + 1);
        }
        batch.records.extend(records);
        Ok(())
    }
}

#[async_trait]
impl SourceConsumer for MemoryConsumer {
    async fn assign_partitions(&mut self, assignment: &OffsetAssignment) -> Result<()> {
        for (topic, partition, offset) in assignment.iter() {
            let resolved = self.cluster.resolve_offset(topic, partition, offset)?;
            self.positions.insert((topic.to_string(), partition), resolved);
        }
        Ok(())
    }

    async fn poll_fetch(&mut self) -> Result<FetchBatch> {
        self.cluster
            .state
            .lock()
            .enter(Operation::Fetch)
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let mut batch = FetchBatch::default();
        let partitions: Vec<(String, i32)> = self.positions.keys().cloned().collect();

        for (topic, partition) in partitions {
            if let Err(error) = self.poll_partition(&topic, partition, &mut batch) {
                batch.errors.push(PartitionFetchError {
                    topic,
                    partition,
                    error,
                });
            }
        }

        if batch.records.is_empty() {
            tokio::time::sleep(self.poll_timeout).await;
        }

        Ok(batch)
    }
}
