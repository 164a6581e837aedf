//! The materializer (spec §4.6): consumes `events.raw` and projects events
//! into the read-model tables in [`crate::handlers`], tracking its own
//! progress in Postgres rather than trusting the bus's consumer-group
//! offset commits.
//!
//! Drives its subscription through [`lifestream_runtime::event_loop::WorkerLoop`],
//! the same consumer loop the router and workers use, grounded on the
//! teacher's `ProjectionManager::start` event loop (subscribe,
//! `tokio::select!` over next-message vs. a shutdown watch channel). The
//! teacher's `ProjectionCheckpoint` is a single `(projection_name) -> offset`
//! checkpoint saved every N events outside any transaction; this
//! materializer instead needs the projection write, the idempotency
//! insert, and the progress update to commit or roll back as one unit
//! (spec §4.6 step 3), so it talks to its own `PgPool` directly for those
//! three things rather than going through `lifestream-postgres`'s
//! `IdempotencyLedger`/`ConsumerProgressStore` trait objects (those exist
//! for callers, like the router, that don't need that coupling).

use lifestream_core::domain::DomainEvent;
use lifestream_core::event::{EventError, StoredEvent};
use lifestream_core::event_bus::{EventBus, EventBusError};
use lifestream_core::progress::{ConsumerProgressStore, ProgressError};
use lifestream_runtime::event_loop::WorkerLoop;
use lifestream_runtime::metrics::MaterializerMetrics;
use lifestream_runtime::retry::RetryPolicy;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;

use crate::handlers::{self, HandlerError};

/// Errors from running the materializer.
#[derive(thiserror::Error, Debug)]
pub enum MaterializerError {
    /// Could not subscribe to the bus.
    #[error("failed to subscribe to events: {0}")]
    Subscription(#[from] EventBusError),
    /// A database operation failed.
    #[error("materializer database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Could not read recorded progress during startup reconciliation.
    #[error("materializer progress error: {0}")]
    Progress(#[from] ProgressError),
}

/// Projects `events.raw` into the domain read model.
pub struct Materializer {
    pool: PgPool,
    bus: Arc<dyn EventBus>,
    progress: Arc<dyn ConsumerProgressStore>,
    topic: String,
    consumer_group: String,
    shutdown: watch::Receiver<bool>,
    retry_policy: RetryPolicy,
}

impl Materializer {
    /// Build a materializer over `topic` (normally `events.raw`).
    ///
    /// `pool` must have both this crate's and `lifestream-postgres`'s
    /// migrations applied, since the idempotency ledger and consumer
    /// progress tables it writes to are owned by `lifestream-postgres`.
    /// `progress` is consulted once at startup (see [`Self::reconcile_offsets`])
    /// and is otherwise separate from the per-message transactional writes
    /// this type does directly against `pool`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        bus: Arc<dyn EventBus>,
        progress: Arc<dyn ConsumerProgressStore>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            bus,
            progress,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            shutdown,
            retry_policy: RetryPolicy::builder().max_retries(3).build(),
        }
    }

    /// Run until the shutdown channel fires.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializerError::Subscription`] if the initial subscribe
    /// fails, or [`MaterializerError::Progress`]/[`MaterializerError::Database`]
    /// if startup reconciliation cannot read or truncate its bookkeeping.
    /// Per-message failures are retried, then recorded as processed
    /// anyway (poison-message handling, spec §4.6) rather than propagated.
    pub async fn run(&mut self) -> Result<(), MaterializerError> {
        tracing::info!(
            topic = %self.topic,
            consumer_group = %self.consumer_group,
            "starting materializer"
        );

        let start_offsets = self.reconcile_offsets().await?;

        let worker_loop = WorkerLoop::new(
            Arc::clone(&self.bus),
            vec![self.topic.clone()],
            self.consumer_group.clone(),
            self.shutdown.clone(),
        )
        .with_start_offsets(start_offsets);

        let this = &*self;
        worker_loop
            .run(|event, partition, offset| async move {
                this.handle_message(event, partition, offset).await;
            })
            .await?;

        Ok(())
    }

    /// Spec §4.6's startup offset reconciliation: compare what this
    /// materializer last recorded against what the bus currently retains,
    /// and decide where each partition should resume from.
    ///
    /// For each partition: let `desired` be one past the last offset this
    /// consumer group recorded (0 if none recorded yet). If `desired` falls
    /// before the earliest retained offset, messages were lost to retention
    /// and we seek to `earliest` with a warning. If `desired` falls beyond
    /// the latest offset, the topic was recreated (e.g. via `reset-bus`);
    /// this consumer group's idempotency/progress bookkeeping for the topic
    /// is truncated and every partition reseeks to `earliest`, since
    /// projections are idempotent and can safely reprocess everything.
    /// Otherwise we seek to `desired`.
    async fn reconcile_offsets(&self) -> Result<Vec<(i32, i64)>, MaterializerError> {
        let watermarks = self.bus.watermarks(&self.topic).await?;

        let mut desired_by_partition = Vec::with_capacity(watermarks.len());
        for watermark in &watermarks {
            let recorded = self
                .progress
                .load_offset(&self.consumer_group, &self.topic, watermark.partition)
                .await?;
            let desired = recorded.map_or(0, |offset| offset + 1);
            desired_by_partition.push((watermark.partition, desired));
        }

        let bus_recreated = watermarks.iter().zip(&desired_by_partition).any(
            |(watermark, (_, desired))| *desired > watermark.latest,
        );

        if bus_recreated {
            tracing::warn!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                "recorded offset is beyond the bus's latest offset, topic appears to have been recreated; truncating progress and reprojecting from earliest"
            );
            self.truncate_ledger_for_topic().await?;
            return Ok(watermarks.iter().map(|w| (w.partition, w.earliest)).collect());
        }

        let mut start_offsets = Vec::with_capacity(watermarks.len());
        for (watermark, (partition, desired)) in watermarks.iter().zip(desired_by_partition) {
            if desired < watermark.earliest {
                tracing::warn!(
                    topic = %self.topic,
                    consumer_group = %self.consumer_group,
                    partition,
                    desired,
                    earliest = watermark.earliest,
                    "recorded offset has fallen off the bus's retention window, some messages will never be reprojected"
                );
                start_offsets.push((partition, watermark.earliest));
            } else {
                start_offsets.push((partition, desired));
            }
        }

        Ok(start_offsets)
    }

    async fn truncate_ledger_for_topic(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM idempotency_ledger WHERE topic = $1")
            .bind(&self.topic)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM consumer_progress WHERE topic = $1 AND consumer_role = $2")
            .bind(&self.topic)
            .bind(&self.consumer_group)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    async fn handle_message(&self, event: StoredEvent, partition: i32, offset: i64) {
        let already_processed = match self.was_processed(partition, offset).await {
            Ok(seen) => seen,
            Err(e) => {
                tracing::error!(error = %e, partition, offset, "failed to check idempotency ledger");
                false
            }
        };
        if already_processed {
            MaterializerMetrics::record_skipped();
            return;
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.process_once(&event, partition, offset).await {
                Ok(()) => {
                    MaterializerMetrics::record_applied();
                    return;
                }
                Err(e) if attempt < self.retry_policy.max_retries => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        event_id = %event.event_id,
                        "materializer handler failed, retrying"
                    );
                    tokio::time::sleep(self.retry_policy.delay_for_attempt(attempt)).await;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        attempt,
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        partition,
                        offset,
                        "poison message: recording offset as processed anyway"
                    );
                    metrics::counter!("materializer_poison_messages_total").increment(1);
                    if let Err(e) = self.mark_processed_only(partition, offset).await {
                        tracing::error!(error = %e, "failed to record poison message offset");
                    }
                    return;
                }
            }
        }
    }

    async fn was_processed(&self, partition: i32, offset: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT 1 AS found FROM idempotency_ledger
             WHERE topic = $1 AND partition = $2 AND kafka_offset = $3",
        )
        .bind(&self.topic)
        .bind(partition)
        .bind(offset)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn process_once(
        &self,
        event: &StoredEvent,
        partition: i32,
        offset: i64,
    ) -> Result<(), MaterializeMessageError> {
        let decoded = event.decode()?;

        let mut tx = self.pool.begin().await?;
        apply(&mut tx, event, &decoded).await?;
        record_progress(&mut tx, &self.topic, &self.consumer_group, partition, offset, event)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn mark_processed_only(&self, partition: i32, offset: i64) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO idempotency_ledger (topic, partition, kafka_offset, processed_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (topic, partition, kafka_offset) DO NOTHING",
        )
        .bind(&self.topic)
        .bind(partition)
        .bind(offset)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO consumer_progress (consumer_role, topic, partition, committed_offset, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (consumer_role, topic, partition) DO UPDATE
             SET committed_offset = EXCLUDED.committed_offset, updated_at = now()
             WHERE consumer_progress.committed_offset < EXCLUDED.committed_offset",
        )
        .bind(&self.consumer_group)
        .bind(&self.topic)
        .bind(partition)
        .bind(offset)
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
}

#[derive(thiserror::Error, Debug)]
enum MaterializeMessageError {
    #[error("failed to decode event: {0}")]
    Decode(#[from] EventError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

async fn apply(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &StoredEvent,
    decoded: &DomainEvent,
) -> Result<(), MaterializeMessageError> {
    match decoded {
        DomainEvent::LinkAdded(p) => handlers::apply_link_added(tx, event, p).await?,
        DomainEvent::ContentFetched(p) => handlers::apply_content_fetched(tx, event, p).await?,
        DomainEvent::EnrichmentCompleted(p) => {
            handlers::apply_enrichment_completed(tx, event, p).await?;
        }
        DomainEvent::PublishCompleted(p) => handlers::apply_publish_completed(tx, event, p).await?,
        DomainEvent::LinkVisibilityChanged(p) => {
            handlers::apply_link_visibility_changed(tx, event, p).await?;
        }
        DomainEvent::TempReadingRecorded(p) => {
            handlers::apply_temp_reading_recorded(tx, event, p).await?;
        }
        DomainEvent::TodoCreated(p) => handlers::apply_todo_created(tx, event, p).await?,
        DomainEvent::TodoCompleted(p) => handlers::apply_todo_completed(tx, event, p).await?,
        DomainEvent::AnnotationAdded(p) => handlers::apply_annotation_added(tx, event, p).await?,
        // The router owns retry/DLQ for work.failed (spec §9 open-question
        // resolution); the materializer has no projection effect for it.
        DomainEvent::WorkFailed(_) => {}
    }
    Ok(())
}

async fn record_progress(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    topic: &str,
    consumer_group: &str,
    partition: i32,
    offset: i64,
    event: &StoredEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO idempotency_ledger (topic, partition, kafka_offset, processed_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (topic, partition, kafka_offset) DO NOTHING",
    )
    .bind(topic)
    .bind(partition)
    .bind(offset)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO consumer_progress (consumer_role, topic, partition, committed_offset, updated_at)
         VALUES ($1, $2, $3, $4, now())
         ON CONFLICT (consumer_role, topic, partition) DO UPDATE
         SET committed_offset = EXCLUDED.committed_offset, updated_at = now()
         WHERE consumer_progress.committed_offset < EXCLUDED.committed_offset",
    )
    .bind(consumer_group)
    .bind(topic)
    .bind(partition)
    .bind(offset)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        partition,
        offset,
        "materialized event"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializer_error_messages_are_descriptive() {
        let err = MaterializerError::Database(sqlx::Error::RowNotFound);
        assert!(err.to_string().contains("materializer database error"));
    }
}
