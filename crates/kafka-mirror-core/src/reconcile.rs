//! Sink topic reconciliation.
//!
//! Before mirroring, every requested topic on the sink is deleted (if
//! present) and recreated with the source's partition count. Existing sink
//! data under a requested name is discarded.
//!
//! Admin changes reach a cluster's metadata eventually, so each destructive
//! phase is followed by polling until the sink reports the new state.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::ClusterAdmin;
use crate::config::RunConfig;
use crate::error::{ConvergencePhase, KafkaError};
use crate::kafka::{TopicMetadata, TopicToCreate};
use crate::wait::wait_until;
use crate::{Error, Result};

/// Sink changes needed to mirror the requested topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Requested topics that currently exist on the sink, in request order
    pub topics_to_delete: Vec<String>,
    /// Every requested topic with the source's partition count, in request
    /// order
    pub topics_to_create: Vec<TopicToCreate>,
}

impl ReconciliationPlan {
    /// Build the plan from source and sink metadata.
    ///
    /// Requested topics missing from `source` are skipped; callers validate
    /// the source first.
    pub fn build(requested: &[String], source: &[TopicMetadata], sink: &[TopicMetadata]) -> Self {
        let topics_to_delete = requested
            .iter()
            .filter(|name| sink.iter().any(|t| &t.name == *name))
            .cloned()
            .collect();

        let topics_to_create = requested
            .iter()
            .filter_map(|name| {
                source
                    .iter()
                    .find(|t| &t.name == name)
                    .map(|t| TopicToCreate::new(name.clone(), t.partition_count()))
            })
            .collect();

        Self {
            topics_to_delete,
            topics_to_create,
        }
    }

    /// Whether executing the plan discards existing sink data
    pub fn is_destructive(&self) -> bool {
        !self.topics_to_delete.is_empty()
    }
}

/// Outcome of a completed reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Source metadata of the requested topics, in request order
    pub source_topics: Vec<TopicMetadata>,
    /// Sink topics that were deleted
    pub deleted: Vec<String>,
    /// Sink topics that were created
    pub created: Vec<TopicToCreate>,
}

/// Drives the sink's topic layout to match the source's.
pub struct TopicReconciler {
    source: Arc<dyn ClusterAdmin>,
    sink: Arc<dyn ClusterAdmin>,
    config: RunConfig,
}

impl TopicReconciler {
    pub fn new(source: Arc<dyn ClusterAdmin>, sink: Arc<dyn ClusterAdmin>, config: RunConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Run one admin/metadata RPC under the run's timeout.
    async fn bounded<T>(&self, what: &str, rpc: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.timeout, rpc).await {
            Ok(result) => result,
            Err(_) => Err(KafkaError::Timeout(format!(
                "{} did not complete within {:?}",
                what, self.config.timeout
            ))
            .into()),
        }
    }

    /// Fetch source metadata for every requested topic, in request order.
    ///
    /// Fails with [`Error::MissingTopics`] naming every absent topic.
    pub async fn validate_source(&self) -> Result<Vec<TopicMetadata>> {
        let requested = self.config.topics.topic_names();
        let mut found = self
            .bounded("source metadata", self.source.list_topics(&requested))
            .await?;

        let missing: Vec<String> = requested
            .iter()
            .filter(|name| !found.iter().any(|t| &t.name == *name))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(Error::MissingTopics(missing));
        }

        found.sort_by_key(|t| requested.iter().position(|name| *name == t.name));
        found.retain(|t| requested.contains(&t.name));

        for topic in &found {
            debug!(
                "Source topic '{}' has {} partition(s)",
                topic.name,
                topic.partition_count()
            );
        }

        Ok(found)
    }

    /// Validate the source and compute the plan without changing the sink.
    pub async fn plan(&self) -> Result<(Vec<TopicMetadata>, ReconciliationPlan)> {
        let source_topics = self.validate_source().await?;

        let requested = self.config.topics.topic_names();
        let sink_topics = self
            .bounded("sink metadata", self.sink.list_topics(&requested))
            .await?;

        let plan = ReconciliationPlan::build(&requested, &source_topics, &sink_topics);
        Ok((source_topics, plan))
    }

    /// Apply a plan to the sink and wait for its metadata to converge.
    pub async fn execute(&self, plan: &ReconciliationPlan) -> Result<()> {
        if plan.is_destructive() {
            info!(
                "Deleting {} sink topic(s): {}",
                plan.topics_to_delete.len(),
                plan.topics_to_delete.join(", ")
            );
            self.bounded(
                "sink topic deletion",
                self.sink
                    .delete_topics(&plan.topics_to_delete, self.config.timeout),
            )
            .await?;
            self.await_deletion(&plan.topics_to_delete).await?;
        }

        for topic in &plan.topics_to_create {
            info!(
                "Creating sink topic '{}' with {} partition(s)",
                topic.name, topic.num_partitions
            );
            self.bounded(
                "sink topic creation",
                self.sink
                    .create_topic(&topic.name, topic.num_partitions, self.config.timeout),
            )
            .await?;
        }
        self.await_creation(&plan.topics_to_create).await?;

        Ok(())
    }

    /// Validate, plan and execute.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let (source_topics, plan) = self.plan().await?;
        self.execute(&plan).await?;

        info!(
            "Sink reconciled: {} topic(s) recreated, {} deleted first",
            plan.topics_to_create.len(),
            plan.topics_to_delete.len()
        );

        Ok(ReconcileReport {
            source_topics,
            deleted: plan.topics_to_delete,
            created: plan.topics_to_create,
        })
    }

    /// Sink metadata for `names`; lookup failures are logged and treated as
    /// "not converged yet".
    async fn sink_snapshot(&self, names: &[String]) -> Option<Vec<TopicMetadata>> {
        match self
            .bounded("sink metadata", self.sink.list_topics(names))
            .await
        {
            Ok(topics) => Some(topics),
            Err(e) => {
                warn!("Sink metadata check failed: {}", e);
                None
            }
        }
    }

    async fn await_deletion(&self, names: &[String]) -> Result<()> {
        let pending = Mutex::new(names.to_vec());
        let (this, pending_ref) = (self, &pending);

        let waited = wait_until(self.config.poll_schedule(), move || async move {
            let Some(listed) = this.sink_snapshot(names).await else {
                return false;
            };
            let still_listed: Vec<String> = names
                .iter()
                .filter(|name| listed.iter().any(|t| &t.name == *name))
                .cloned()
                .collect();
            let done = still_listed.is_empty();
            *pending_ref.lock() = still_listed;
            done
        })
        .await;

        match waited {
            Ok(attempts) => {
                debug!("Deletion converged after {} check(s)", attempts);
                Ok(())
            }
            Err(_) => Err(Error::ConvergenceTimeout {
                phase: ConvergencePhase::Deletion,
                pending: pending.into_inner(),
                timeout: self.config.timeout,
            }),
        }
    }

    async fn await_creation(&self, topics: &[TopicToCreate]) -> Result<()> {
        let names: Vec<String> = topics.iter().map(|t| t.name.clone()).collect();
        let pending = Mutex::new(names.clone());
        let (this, pending_ref, names) = (self, &pending, &names);

        let waited = wait_until(self.config.poll_schedule(), move || async move {
            let Some(listed) = this.sink_snapshot(names).await else {
                return false;
            };
            let not_ready: Vec<String> = topics
                .iter()
                .filter(|expected| {
                    !listed.iter().any(|t| {
                        t.name == expected.name && t.partition_count() == expected.num_partitions
                    })
                })
                .map(|t| t.name.clone())
                .collect();
            let done = not_ready.is_empty();
            *pending_ref.lock() = not_ready;
            done
        })
        .await;

        match waited {
            Ok(attempts) => {
                debug!("Creation converged after {} check(s)", attempts);
                Ok(())
            }
            Err(_) => Err(Error::ConvergenceTimeout {
                phase: ConvergencePhase::Creation,
                pending: pending.into_inner(),
                timeout: self.config.timeout,
            }),
        }
    }
}
