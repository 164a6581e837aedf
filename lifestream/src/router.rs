//! The router (spec §4.4): the sole place dispatch decisions and retry/DLQ
//! bookkeeping for work commands live.
//!
//! Subscribes to `events.raw` — the same materialized stream the
//! projections crate consumes — and for each event either emits a
//! [`WorkCommand`] on the matching `work.*` topic, retries a failed one, or
//! dead-letters it. `work.failed` never gets its own bus topic: it is a
//! [`DomainEvent`] like any other, so it rides the ordinary outbox path
//! back onto `events.raw`, and the router is simply another handler for it.
//!
//! Drives its subscription through
//! [`lifestream_runtime::event_loop::WorkerLoop`], the consumer loop shape
//! also used by the materializer and the workers, and checks
//! [`crate::projection_queries::ProjectionQueries`] before dispatching so a
//! redelivered `events.raw` message never re-dispatches work whose effect
//! already landed (idempotent dispatch, not just idempotent consumption).

use lifestream_core::domain::{DomainEvent, WorkCommand, WorkType};
use lifestream_core::event::{EventError, NewEvent, StoredEvent};
use lifestream_core::event_bus::{EventBus, EventBusError};
use lifestream_core::idempotency::IdempotencyLedger;
use lifestream_core::ledger::EventLedger;
use lifestream_postgres::FailedWorkQueue;
use lifestream_runtime::event_loop::WorkerLoop;
use lifestream_runtime::metrics::{RouterMetrics, WorkerMetrics};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::projection_queries::ProjectionQueries;

/// Errors from running the router.
#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    /// Could not subscribe to `events.raw`.
    #[error("router subscription failed: {0}")]
    Subscription(#[from] EventBusError),
}

/// Dispatches work and retry/DLQ decisions from `events.raw`.
pub struct Router {
    bus: Arc<dyn EventBus>,
    idempotency: Arc<dyn IdempotencyLedger>,
    queries: Arc<ProjectionQueries>,
    dlq: Arc<FailedWorkQueue>,
    source_topic: String,
    consumer_group: String,
    default_max_attempts: u32,
    shutdown: watch::Receiver<bool>,
}

impl Router {
    /// Build a router over `source_topic` (normally `events.raw`).
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        idempotency: Arc<dyn IdempotencyLedger>,
        queries: Arc<ProjectionQueries>,
        dlq: Arc<FailedWorkQueue>,
        source_topic: impl Into<String>,
        consumer_group: impl Into<String>,
        default_max_attempts: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            idempotency,
            queries,
            dlq,
            source_topic: source_topic.into(),
            consumer_group: consumer_group.into(),
            default_max_attempts,
            shutdown,
        }
    }

    /// Run until the shutdown channel fires.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Subscription`] if the initial subscribe fails.
    pub async fn run(&mut self) -> Result<(), RouterError> {
        tracing::info!(topic = %self.source_topic, "starting router");

        let worker_loop = WorkerLoop::new(
            Arc::clone(&self.bus),
            vec![self.source_topic.clone()],
            self.consumer_group.clone(),
            self.shutdown.clone(),
        );

        let this = &*self;
        worker_loop
            .run(|event, partition, offset| async move {
                this.handle_message(event, partition, offset).await;
            })
            .await?;

        Ok(())
    }

    async fn handle_message(&self, event: StoredEvent, partition: i32, offset: i64) {
        match self.idempotency.was_processed(&self.source_topic, partition, offset).await {
            Ok(true) => {
                RouterMetrics::record_duplicate();
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, partition, offset, "router idempotency check failed");
            }
        }

        let decoded = match event.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::error!(error = %e, event_id = %event.event_id, "router could not decode event, skipping");
                return;
            }
        };

        if let Err(e) = self.dispatch(&event, &decoded).await {
            tracing::error!(error = %e, event_id = %event.event_id, "router dispatch failed");
        }

        if let Err(e) = self
            .idempotency
            .mark_processed(&self.source_topic, partition, offset, Utc::now())
            .await
        {
            tracing::error!(error = %e, partition, offset, "router failed to record idempotency");
        }
    }

    async fn dispatch(&self, event: &StoredEvent, decoded: &DomainEvent) -> Result<(), EventBusError> {
        match decoded {
            DomainEvent::LinkAdded(payload) => {
                let already_fetched = self.queries.has_content(&event.subject_id).await.unwrap_or(false);
                if already_fetched {
                    RouterMetrics::record_skipped();
                    return Ok(());
                }
                self.dispatch_work(
                    event,
                    WorkType::FetchLink,
                    serde_json::json!({ "url": payload.url_norm.clone().unwrap_or_else(|| payload.url.clone()) }),
                )
                .await
            }
            DomainEvent::ContentFetched(payload) if payload.fetch_error.is_none() => {
                let already_enriched = self.queries.has_enrichment(&event.subject_id).await.unwrap_or(false);
                if already_enriched {
                    RouterMetrics::record_skipped();
                    return Ok(());
                }
                self.dispatch_work(
                    event,
                    WorkType::EnrichLink,
                    serde_json::json!({
                        "title": payload.title,
                        "text_content": payload.text_content,
                    }),
                )
                .await
            }
            DomainEvent::ContentFetched(_) => {
                // A fetch_error is a partial success, not retryable (spec §4.5).
                RouterMetrics::record_skipped();
                Ok(())
            }
            DomainEvent::EnrichmentCompleted(_) => {
                let publish_caught_up = self
                    .queries
                    .publish_state(&event.subject_id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|state| !state.dirty && state.published_version >= state.desired_version);
                if publish_caught_up {
                    RouterMetrics::record_skipped();
                    return Ok(());
                }
                self.dispatch_work(event, WorkType::PublishLink, serde_json::json!({})).await
            }
            DomainEvent::WorkFailed(payload) => {
                self.handle_work_failed(event, &payload.work_message, &payload.error, &payload.agent)
                    .await
            }
            // Everything else has no downstream work (spec §4.4 dispatch table).
            _ => {
                RouterMetrics::record_skipped();
                Ok(())
            }
        }
    }

    async fn dispatch_work(
        &self,
        event: &StoredEvent,
        work_type: WorkType,
        payload: serde_json::Value,
    ) -> Result<(), EventBusError> {
        let command = WorkCommand {
            subject_id: event.subject_id.clone(),
            work_type,
            correlation_id: event.correlation_id,
            triggered_by_event_id: event.event_id,
            attempt: 1,
            max_attempts: self.default_max_attempts,
            created_at: Utc::now(),
            last_error: None,
            payload,
        };
        self.publish_work(&command).await?;
        RouterMetrics::record_routed();
        Ok(())
    }

    async fn handle_work_failed(
        &self,
        event: &StoredEvent,
        work: &WorkCommand,
        error: &str,
        agent: &str,
    ) -> Result<(), EventBusError> {
        if work.attempt < work.max_attempts {
            let retry = WorkCommand {
                attempt: work.attempt + 1,
                created_at: Utc::now(),
                last_error: Some(error.to_string()),
                ..work.clone()
            };
            self.publish_work(&retry).await?;
            RouterMetrics::record_routed();
            return Ok(());
        }

        let dead_letter = lifestream_core::domain::DeadLetter {
            original_work: work.clone(),
            final_error: error.to_string(),
            failed_at: event.occurred_at,
            agent: agent.to_string(),
        };
        if let Err(e) = self.dlq.add_entry(&dead_letter).await {
            tracing::error!(error = %e, subject_id = %work.subject_id, "failed to record dead letter");
        }
        WorkerMetrics::record_dead_lettered();
        self.publish_dead_letter(&dead_letter).await
    }

    async fn publish_work(&self, command: &WorkCommand) -> Result<(), EventBusError> {
        let envelope = work_command_envelope(command);
        self.bus
            .publish(command.work_type.topic(), command.subject_id.as_str(), &envelope)
            .await
    }

    async fn publish_dead_letter(
        &self,
        dead_letter: &lifestream_core::domain::DeadLetter,
    ) -> Result<(), EventBusError> {
        let envelope = dead_letter_envelope(dead_letter);
        self.bus
            .publish("work.dead_letter", dead_letter.original_work.subject_id.as_str(), &envelope)
            .await
    }
}

/// Wrap a [`WorkCommand`] in a [`StoredEvent`] envelope for publication on
/// its `work.*` topic. Work commands are not part of the [`DomainEvent`]
/// tag scheme, so this is built by hand rather than via
/// [`NewEvent::from_domain_event`] — `event_type` just carries the topic
/// name as a descriptive label.
fn work_command_envelope(command: &WorkCommand) -> StoredEvent {
    let now = Utc::now();
    StoredEvent {
        event_id: Uuid::new_v4(),
        occurred_at: command.created_at,
        received_at: now,
        source: "router".to_string(),
        subject_kind: command.subject_id.kind(),
        subject_id: command.subject_id.clone(),
        event_type: command.work_type.topic().to_string(),
        schema_version: 1,
        payload: serde_json::to_value(command).unwrap_or(serde_json::Value::Null),
        correlation_id: command.correlation_id,
        causation_id: Some(command.triggered_by_event_id),
        forwarded: true,
    }
}

fn dead_letter_envelope(dead_letter: &lifestream_core::domain::DeadLetter) -> StoredEvent {
    let now = Utc::now();
    StoredEvent {
        event_id: Uuid::new_v4(),
        occurred_at: dead_letter.failed_at,
        received_at: now,
        source: "router".to_string(),
        subject_kind: dead_letter.original_work.subject_id.kind(),
        subject_id: dead_letter.original_work.subject_id.clone(),
        event_type: "work.dead_letter".to_string(),
        schema_version: 1,
        payload: serde_json::to_value(dead_letter).unwrap_or(serde_json::Value::Null),
        correlation_id: dead_letter.original_work.correlation_id,
        causation_id: Some(dead_letter.original_work.triggered_by_event_id),
        forwarded: true,
    }
}

/// Decode a work command delivered on a `work.*` topic.
///
/// # Errors
///
/// Returns [`EventError::PayloadMismatch`] if `event.payload` is not a
/// well-formed [`WorkCommand`].
pub fn decode_work_command(event: &StoredEvent) -> Result<WorkCommand, EventError> {
    serde_json::from_value(event.payload.clone()).map_err(|e| EventError::PayloadMismatch {
        event_type: event.event_type.clone(),
        reason: e.to_string(),
    })
}

/// Build a [`NewEvent`] carrying a completion or failure event for `ledger`
/// appends made by workers, copying `correlation_id` from the triggering
/// work command (spec §4.5).
#[must_use]
pub fn completion_event(work: &WorkCommand, source: impl Into<String>, event: &DomainEvent) -> NewEvent {
    NewEvent::from_domain_event(
        work.subject_id.clone(),
        source,
        Utc::now(),
        work.correlation_id,
        Some(work.triggered_by_event_id),
        event,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_work() -> WorkCommand {
        WorkCommand {
            subject_id: "link:abc123".parse().unwrap(),
            work_type: WorkType::FetchLink,
            correlation_id: Uuid::new_v4(),
            triggered_by_event_id: Uuid::new_v4(),
            attempt: 1,
            max_attempts: 3,
            created_at: Utc::now(),
            last_error: None,
            payload: serde_json::json!({"url": "https://example.com/a"}),
        }
    }

    #[test]
    fn work_command_envelope_round_trips_through_decode_work_command() {
        let work = sample_work();
        let envelope = work_command_envelope(&work);
        assert_eq!(envelope.event_type, "work.fetch_link");
        let decoded = decode_work_command(&envelope).unwrap();
        assert_eq!(decoded.subject_id, work.subject_id);
        assert_eq!(decoded.attempt, work.attempt);
    }

    #[test]
    fn dead_letter_envelope_carries_final_error() {
        let work = sample_work();
        let dead_letter = lifestream_core::domain::DeadLetter {
            original_work: work,
            final_error: "timeout".to_string(),
            failed_at: Utc::now(),
            agent: "fetcher-1".to_string(),
        };
        let envelope = dead_letter_envelope(&dead_letter);
        assert_eq!(envelope.event_type, "work.dead_letter");
        assert_eq!(envelope.payload["final_error"], "timeout");
    }
}
