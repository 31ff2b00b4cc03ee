//! Sink-side writer built on the partition leader router.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::SinkProducer;
use crate::record::MirrorRecord;
use crate::Result;

use super::produce::{ProduceOptions, ProduceResponse};
use super::PartitionLeaderRouter;

/// Writes mirrored batches to partition leaders on the sink cluster.
pub struct KafkaSinkProducer {
    router: Arc<PartitionLeaderRouter>,
    options: ProduceOptions,
}

impl KafkaSinkProducer {
    pub fn new(router: Arc<PartitionLeaderRouter>, options: ProduceOptions) -> Self {
        Self { router, options }
    }
}

#[async_trait]
impl SinkProducer for KafkaSinkProducer {
    async fn produce(
        &self,
        topic: &str,
        partition: i32,
        records: Vec<MirrorRecord>,
    ) -> Result<ProduceResponse> {
        self.router
            .produce(topic, partition, records, &self.options)
            .await
    }
}
