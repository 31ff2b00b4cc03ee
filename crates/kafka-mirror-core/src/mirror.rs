//! The mirror loop: pull from the source, forward to the sink.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::assign::OffsetAssignment;
use crate::broker::{FetchBatch, SinkProducer, SourceConsumer};
use crate::config::{DeliveryMode, MirrorOptions};
use crate::metrics::{MetricsReport, MirrorMetrics};
use crate::record::MirrorRecord;
use crate::Result;

/// Lifecycle of a mirror loop. There is no way back into `Seeding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorState {
    Seeding,
    Running,
    Terminated,
}

/// Loop settings taken from [`MirrorOptions`]
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub delivery: DeliveryMode,
    /// Produce batches are split so their estimated encoded size stays
    /// under this bound
    pub max_batch_bytes: usize,
    pub forward_queue_capacity: usize,
    pub report_interval: Duration,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self::from(&MirrorOptions::default())
    }
}

impl From<&MirrorOptions> for MirrorSettings {
    fn from(options: &MirrorOptions) -> Self {
        Self {
            delivery: options.delivery,
            max_batch_bytes: options.produce_max_batch_bytes,
            forward_queue_capacity: options.forward_queue_capacity,
            report_interval: options.report_interval(),
        }
    }
}

/// Fixed header of a v2 record batch
const BATCH_HEADER_BYTES: usize = 61;

/// Worst-case varint framing around one record's payload: length,
/// attributes, timestamp and offset deltas, key, value and header counts.
const RECORD_FRAMING_BYTES: usize = 36;

/// Worst-case varint framing around one header's key and value
const HEADER_FRAMING_BYTES: usize = 10;

fn framed_size(record: &MirrorRecord) -> usize {
    record.size_bytes() + RECORD_FRAMING_BYTES + HEADER_FRAMING_BYTES * record.headers.len()
}

/// Records for one sink partition, in source order
#[derive(Debug)]
struct ForwardBatch {
    topic: String,
    partition: i32,
    records: Vec<MirrorRecord>,
}

impl ForwardBatch {
    /// Split into consecutive batches whose estimated encoded size fits in
    /// `max_bytes`. A record too large on its own travels alone.
    fn split(self, max_bytes: usize) -> Vec<ForwardBatch> {
        let ForwardBatch {
            topic,
            partition,
            records,
        } = self;

        let mut chunks: Vec<Vec<MirrorRecord>> = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = BATCH_HEADER_BYTES;

        for record in records {
            let size = framed_size(&record);
            if !current.is_empty() && current_bytes + size > max_bytes {
                chunks.push(std::mem::take(&mut current));
                current_bytes = BATCH_HEADER_BYTES;
            }
            current_bytes += size;
            current.push(record);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        if chunks.len() > 1 {
            debug!(
                "Split {}:{} into {} produce batches",
                topic,
                partition,
                chunks.len()
            );
        }

        chunks
            .into_iter()
            .map(|records| ForwardBatch {
                topic: topic.clone(),
                partition,
                records,
            })
            .collect()
    }
}

/// Split a fetch into per-partition batches. Order within a partition is
/// kept; partitions appear in first-seen order.
fn group_by_partition(records: Vec<MirrorRecord>) -> Vec<ForwardBatch> {
    let mut grouped: IndexMap<(String, i32), Vec<MirrorRecord>> = IndexMap::new();
    for record in records {
        grouped
            .entry((record.topic.clone(), record.partition))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|((topic, partition), records)| ForwardBatch {
            topic,
            partition,
            records,
        })
        .collect()
}

/// Produce one batch. Failures are logged and counted, never returned.
async fn produce_batch(sink: &dyn SinkProducer, metrics: &MirrorMetrics, batch: ForwardBatch) {
    let count = batch.records.len() as u64;
    let start = Instant::now();

    match sink
        .produce(&batch.topic, batch.partition, batch.records)
        .await
    {
        Ok(response) => {
            trace!(
                "Forwarded {} record(s) to {}:{} at base offset {}",
                count,
                batch.topic,
                batch.partition,
                response.base_offset
            );
            metrics.record_forwarded(count, start.elapsed());
        }
        Err(e) => {
            warn!(
                "Failed to forward {} record(s) to {}:{}: {}",
                count, batch.topic, batch.partition, e
            );
            metrics.record_produce_error(count);
        }
    }
}

/// Hands batches to the sink according to the delivery mode.
enum Forwarder {
    Acknowledged {
        sink: Arc<dyn SinkProducer>,
        metrics: Arc<MirrorMetrics>,
    },
    BestEffort {
        queue: mpsc::Sender<ForwardBatch>,
        worker: JoinHandle<()>,
        metrics: Arc<MirrorMetrics>,
    },
}

impl Forwarder {
    fn start(settings: &MirrorSettings, sink: Arc<dyn SinkProducer>, metrics: Arc<MirrorMetrics>) -> Self {
        match settings.delivery {
            DeliveryMode::Acknowledged => Forwarder::Acknowledged { sink, metrics },
            DeliveryMode::BestEffort => {
                let (queue, mut rx) = mpsc::channel::<ForwardBatch>(settings.forward_queue_capacity);
                let worker_metrics = Arc::clone(&metrics);
                let worker = tokio::spawn(async move {
                    while let Some(batch) = rx.recv().await {
                        produce_batch(sink.as_ref(), &worker_metrics, batch).await;
                    }
                    debug!("Forward queue drained");
                });
                Forwarder::BestEffort {
                    queue,
                    worker,
                    metrics,
                }
            }
        }
    }

    async fn forward(&self, batch: ForwardBatch) {
        match self {
            Forwarder::Acknowledged { sink, metrics } => {
                produce_batch(sink.as_ref(), metrics, batch).await;
            }
            Forwarder::BestEffort { queue, metrics, .. } => {
                if let Err(mpsc::error::SendError(batch)) = queue.send(batch).await {
                    error!(
                        "Forward queue closed, dropping {} record(s) for {}:{}",
                        batch.records.len(),
                        batch.topic,
                        batch.partition
                    );
                    metrics.record_produce_error(batch.records.len() as u64);
                }
            }
        }
    }

    /// Wait for every queued batch to be produced.
    async fn close(self) {
        if let Forwarder::BestEffort { queue, worker, .. } = self {
            drop(queue);
            if let Err(e) = worker.await {
                error!("Forward worker failed: {}", e);
            }
        }
    }
}

/// Moves records from a source consumer to a sink producer until shutdown
/// or a fatal fetch error.
pub struct MirrorLoop {
    consumer: Box<dyn SourceConsumer>,
    sink: Arc<dyn SinkProducer>,
    settings: MirrorSettings,
    metrics: Arc<MirrorMetrics>,
    state: MirrorState,
}

impl MirrorLoop {
    pub fn new(
        consumer: Box<dyn SourceConsumer>,
        sink: Arc<dyn SinkProducer>,
        settings: MirrorSettings,
    ) -> Self {
        Self {
            consumer,
            sink,
            settings,
            metrics: Arc::new(MirrorMetrics::new()),
            state: MirrorState::Seeding,
        }
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    pub fn metrics(&self) -> Arc<MirrorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Seed the consumer with `assignment` and mirror until `shutdown` fires.
    ///
    /// Returns the final metrics on a clean shutdown. A fatal fetch error ends
    /// the loop with `Err` once queued batches have been produced.
    pub async fn run(
        &mut self,
        assignment: &OffsetAssignment,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<MetricsReport> {
        if self.state != MirrorState::Seeding {
            return Err(crate::Error::Config(format!(
                "mirror loop cannot be started from state {:?}",
                self.state
            )));
        }

        info!(
            "Seeding {} partition(s) across {} topic(s)",
            assignment.partition_count(),
            assignment.topics().count()
        );
        if let Err(e) = self.consumer.assign_partitions(assignment).await {
            self.state = MirrorState::Terminated;
            return Err(e);
        }

        self.state = MirrorState::Running;
        info!("Mirroring started ({:?} delivery)", self.settings.delivery);

        let forwarder = Forwarder::start(
            &self.settings,
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
        );
        let outcome = self.pump(&forwarder, &mut shutdown).await;

        forwarder.close().await;
        self.state = MirrorState::Terminated;

        let report = self.metrics.report();
        match outcome {
            Ok(()) => {
                info!("Mirroring stopped: {}", report);
                Ok(report)
            }
            Err(e) => {
                error!("Mirroring failed: {} ({})", e, report);
                Err(e)
            }
        }
    }

    async fn pump(
        &mut self,
        forwarder: &Forwarder,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut last_report = Instant::now();
        let mut shutdown_open = true;

        loop {
            let batch = tokio::select! {
                biased;
                signal = shutdown.recv(), if shutdown_open => match signal {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        info!("Shutdown signal received, stopping mirror");
                        return Ok(());
                    }
                    Err(RecvError::Closed) => {
                        warn!("Shutdown channel closed without a signal, mirroring continues");
                        shutdown_open = false;
                        None
                    }
                },
                batch = self.consumer.poll_fetch() => Some(batch?),
            };
            let Some(batch) = batch else {
                continue;
            };

            self.handle_batch(forwarder, batch).await;

            if last_report.elapsed() >= self.settings.report_interval {
                info!("Mirror progress: {}", self.metrics.report());
                last_report = Instant::now();
            }
        }
    }

    async fn handle_batch(&mut self, forwarder: &Forwarder, batch: FetchBatch) {
        let FetchBatch { records, errors } = batch;

        for failure in &errors {
            warn!(
                "Fetch error on {}:{}: {}",
                failure.topic, failure.partition, failure.error
            );
        }

        let bytes: usize = records.iter().map(MirrorRecord::size_bytes).sum();
        self.metrics
            .record_poll(records.len() as u64, bytes as u64, errors.len() as u64);

        for batch in group_by_partition(records) {
            for chunk in batch.split(self.settings.max_batch_bytes) {
                forwarder.forward(chunk).await;
            }
        }
    }
}
