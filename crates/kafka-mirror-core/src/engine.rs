//! Mirror engine orchestration: reconcile the sink, assign offsets, mirror.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::assign::{assign_offsets, OffsetAssignment};
use crate::broker::{ClusterAdmin, SinkProducer, SourceConsumer};
use crate::config::{Config, RunConfig};
use crate::kafka::{
    FetchOptions, KafkaSinkProducer, KafkaSourceConsumer, PartitionLeaderRouter, ProduceOptions,
    TopicMetadata,
};
use crate::metrics::MetricsReport;
use crate::mirror::{MirrorLoop, MirrorSettings};
use crate::reconcile::{ReconcileReport, ReconciliationPlan, TopicReconciler};
use crate::Result;

/// Broker handles used by one run.
pub struct Endpoints {
    pub source_admin: Arc<dyn ClusterAdmin>,
    pub sink_admin: Arc<dyn ClusterAdmin>,
    pub consumer: Box<dyn SourceConsumer>,
    pub producer: Arc<dyn SinkProducer>,
}

/// What a run would do, computed without touching the sink.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorPlan {
    pub source_topics: Vec<TopicMetadata>,
    pub reconciliation: ReconciliationPlan,
    /// Starting offsets; sentinels are resolved when the consumer is seeded
    pub assignment: OffsetAssignment,
}

/// Outcome of a run that ended with a shutdown signal.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorSummary {
    pub reconciliation: ReconcileReport,
    pub assignment: OffsetAssignment,
    pub metrics: MetricsReport,
}

/// Mirror engine for one source/sink pair
pub struct MirrorEngine {
    config: Config,
    run_config: RunConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl MirrorEngine {
    /// Validate the configuration and parse the topic specs.
    ///
    /// Nothing is contacted; malformed specs fail here.
    pub fn new(config: Config) -> Result<Self> {
        let run_config = config.run_config()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            run_config,
            shutdown_tx,
        })
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle that can signal shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Connect to both clusters.
    pub async fn connect(&self) -> Result<Endpoints> {
        let source = Arc::new(PartitionLeaderRouter::new(self.config.source.clone()).await?);
        let sink = Arc::new(PartitionLeaderRouter::new(self.config.sink.clone()).await?);

        let options = &self.config.mirror;
        let consumer = KafkaSourceConsumer::new(
            Arc::clone(&source),
            FetchOptions::from(options),
            options.offset_reset,
        );
        let producer = KafkaSinkProducer::new(Arc::clone(&sink), ProduceOptions::from(options));

        Ok(Endpoints {
            source_admin: source,
            sink_admin: sink,
            consumer: Box::new(consumer),
            producer: Arc::new(producer),
        })
    }

    /// Compute the plan against the configured clusters.
    pub async fn plan(&self) -> Result<MirrorPlan> {
        let source = Arc::new(PartitionLeaderRouter::new(self.config.source.clone()).await?);
        let sink = Arc::new(PartitionLeaderRouter::new(self.config.sink.clone()).await?);
        self.plan_with(source, sink).await
    }

    /// Compute the plan with the given admin handles.
    pub async fn plan_with(
        &self,
        source: Arc<dyn ClusterAdmin>,
        sink: Arc<dyn ClusterAdmin>,
    ) -> Result<MirrorPlan> {
        let reconciler = TopicReconciler::new(source, sink, self.run_config.clone());
        let (source_topics, reconciliation) = reconciler.plan().await?;
        let assignment = self.assign(&source_topics);

        Ok(MirrorPlan {
            source_topics,
            reconciliation,
            assignment,
        })
    }

    /// Connect, reconcile and mirror until shutdown.
    pub async fn run(&self) -> Result<MirrorSummary> {
        let endpoints = self.connect().await?;
        self.run_with(endpoints).await
    }

    /// Reconcile and mirror with the given endpoints until shutdown.
    ///
    /// A shutdown signalled during reconciliation stops the loop right after
    /// seeding.
    pub async fn run_with(&self, endpoints: Endpoints) -> Result<MirrorSummary> {
        let shutdown_rx = self.shutdown_receiver();
        let Endpoints {
            source_admin,
            sink_admin,
            consumer,
            producer,
        } = endpoints;

        info!(
            "Reconciling {} topic(s): {}",
            self.run_config.topics.len(),
            self.run_config.topics.topic_names().join(", ")
        );
        let reconciler = TopicReconciler::new(source_admin, sink_admin, self.run_config.clone());
        let reconciliation = reconciler.reconcile().await?;

        let assignment = self.assign(&reconciliation.source_topics);

        let mut mirror = MirrorLoop::new(
            consumer,
            producer,
            MirrorSettings::from(&self.config.mirror),
        );
        let metrics = mirror.run(&assignment, shutdown_rx).await?;

        Ok(MirrorSummary {
            reconciliation,
            assignment,
            metrics,
        })
    }

    fn assign(&self, source_topics: &[TopicMetadata]) -> OffsetAssignment {
        assign_offsets(
            source_topics,
            &self.run_config.topics,
            self.run_config.default_offset.sentinel(),
        )
    }
}
