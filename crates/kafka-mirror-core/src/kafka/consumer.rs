//! Source-side reader built on the partition leader router.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::assign::OffsetAssignment;
use crate::broker::{FetchBatch, PartitionFetchError, SourceConsumer};
use crate::config::MirrorOptions;
use crate::error::codes;
use crate::offset_spec::StartOffset;
use crate::{Error, Result};

use super::fetch::{FetchOptions, PartitionFetchRequest};
use super::PartitionLeaderRouter;

impl From<&MirrorOptions> for FetchOptions {
    fn from(options: &MirrorOptions) -> Self {
        Self {
            max_wait_ms: options.fetch_max_wait_ms,
            max_bytes: options.fetch_max_bytes,
            partition_max_bytes: options.partition_max_bytes,
        }
    }
}

/// Reads assigned partitions from explicit positions, without a consumer
/// group. Positions live only in memory.
pub struct KafkaSourceConsumer {
    router: Arc<PartitionLeaderRouter>,
    positions: BTreeMap<(String, i32), i64>,
    options: FetchOptions,
    offset_reset: StartOffset,
}

impl KafkaSourceConsumer {
    pub fn new(
        router: Arc<PartitionLeaderRouter>,
        options: FetchOptions,
        offset_reset: StartOffset,
    ) -> Self {
        Self {
            router,
            positions: BTreeMap::new(),
            options,
            offset_reset,
        }
    }

    /// Next offset that will be fetched for a partition
    pub fn position(&self, topic: &str, partition: i32) -> Option<i64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    /// Turn a `-1`/`-2` sentinel into a broker offset; explicit offsets pass
    /// through and are checked by the broker on the first fetch.
    async fn resolve(&self, topic: &str, partition: i32, offset: i64) -> Result<i64> {
        if offset >= 0 {
            return Ok(offset);
        }
        self.router.list_offset(topic, partition, offset).await
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.options.max_wait_ms.max(100) as u64)
    }
}

#[async_trait]
impl SourceConsumer for KafkaSourceConsumer {
    async fn assign_partitions(&mut self, assignment: &OffsetAssignment) -> Result<()> {
        for (topic, partition, requested) in assignment.iter() {
            let offset = self.resolve(topic, partition, requested).await?;
            debug!(
                "Seeding {}:{} at offset {} (requested {})",
                topic, partition, offset, requested
            );
            self.positions.insert((topic.to_string(), partition), offset);
        }

        info!(
            "Assigned {} source partition(s)",
            assignment.partition_count()
        );
        Ok(())
    }

    async fn poll_fetch(&mut self) -> Result<FetchBatch> {
        if self.positions.is_empty() {
            tokio::time::sleep(self.backoff()).await;
            return Ok(FetchBatch::default());
        }

        let requests: Vec<PartitionFetchRequest> = self
            .positions
            .iter()
            .map(|((topic, partition), offset)| PartitionFetchRequest {
                topic: topic.clone(),
                partition: *partition,
                offset: *offset,
            })
            .collect();

        let results = self
            .router
            .fetch(&requests, &self.options)
            .await
            .map_err(|e| Error::Fetch(format!("Source cluster unavailable: {}", e)))?;

        let mut batch = FetchBatch::default();

        for result in results {
            let key = (result.topic.clone(), result.partition);

            let Some(error) = result.error else {
                self.positions.insert(key, result.next_offset);
                batch.records.extend(result.records);
                continue;
            };

            if error.code() == Some(codes::OFFSET_OUT_OF_RANGE) {
                match self
                    .router
                    .list_offset(&result.topic, result.partition, self.offset_reset.sentinel())
                    .await
                {
                    Ok(offset) => {
                        warn!(
                            "Offset out of range for {}:{}, resetting to {:?} offset {}",
                            result.topic, result.partition, self.offset_reset, offset
                        );
                        self.positions.insert(key, offset);
                    }
                    Err(e) => warn!(
                        "Could not reset {}:{} after OFFSET_OUT_OF_RANGE: {}",
                        result.topic, result.partition, e
                    ),
                }
            }

            batch.errors.push(PartitionFetchError {
                topic: result.topic,
                partition: result.partition,
                error,
            });
        }

        if batch.records.is_empty() && !batch.errors.is_empty() {
            tokio::time::sleep(self.backoff()).await;
        }

        Ok(batch)
    }
}
