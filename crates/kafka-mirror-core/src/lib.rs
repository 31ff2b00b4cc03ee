//! Kafka Mirror Core Library
//!
//! This crate mirrors Kafka topics from a source cluster to a sink cluster.
//! Before mirroring it recreates every requested topic on the sink with the
//! source's partition count, then forwards records partition for partition
//! from per-topic starting offsets.

pub mod assign;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod metrics;
pub mod mirror;
pub mod offset_spec;
pub mod reconcile;
pub mod record;
pub mod wait;

pub use assign::{assign_offsets, OffsetAssignment};
pub use broker::{ClusterAdmin, FetchBatch, PartitionFetchError, SinkProducer, SourceConsumer};
pub use config::{Config, DeliveryMode, KafkaConfig, MirrorOptions, ProduceAcks, RunConfig};
pub use engine::{Endpoints, MirrorEngine, MirrorPlan, MirrorSummary};
pub use error::{ConvergencePhase, Error, KafkaError, Result};
pub use metrics::{MetricsReport, MirrorMetrics};
pub use mirror::{MirrorLoop, MirrorSettings, MirrorState};
pub use offset_spec::{
    parse_topic_spec, StartOffset, TopicOffsetPolicy, TopicSpec, TopicSpecSet, EARLIEST_OFFSET,
    LATEST_OFFSET,
};
pub use reconcile::{ReconcileReport, ReconciliationPlan, TopicReconciler};
pub use record::{MirrorRecord, RecordHeader};
pub use wait::{wait_until, PollSchedule, WaitElapsed};
