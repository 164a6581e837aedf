//! Per-stage workers (spec §4.5): fetch, enrich, publish.
//!
//! Each stage implements [`StageWorker`] and is driven by the same
//! [`run_stage_worker`] harness: subscribe to the stage's `work.*` topic via
//! [`lifestream_runtime::event_loop::WorkerLoop`], decode the
//! [`WorkCommand`], make exactly one attempt, then append either the
//! stage's completion event or `work.failed` to the ledger. All retry and
//! dead-letter bookkeeping lives in [`crate::router`]; a worker never loops
//! on its own failure.

pub mod enricher;
pub mod fetcher;
pub mod publisher;
pub mod rate_limiter;

use lifestream_core::domain::{DomainEvent, WorkCommand, WorkFailed, WorkType};
use lifestream_core::event_bus::{EventBus, EventBusError};
use lifestream_core::ledger::EventLedger;
use lifestream_runtime::event_loop::WorkerLoop;
use lifestream_runtime::metrics::WorkerMetrics;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::router::{completion_event, decode_work_command};

/// Errors from running a stage worker.
#[derive(thiserror::Error, Debug)]
pub enum StageWorkerError {
    /// Could not subscribe to the stage's work topic.
    #[error("worker subscription failed: {0}")]
    Subscription(#[from] EventBusError),
}

/// One per-stage unit of work: decode, perform, produce the resulting event.
///
/// `Send + Sync` with `Pin<Box<dyn Future<...> + Send + '_>>` returns so
/// implementations can be shared behind `Arc<dyn StageWorker>`, the same
/// dyn-compatible shape as [`EventLedger`]/[`EventBus`].
pub trait StageWorker: Send + Sync {
    /// The work type this implementation handles.
    fn work_type(&self) -> WorkType;

    /// Identity recorded on `work.failed`/dead-letter records.
    fn agent_id(&self) -> &str;

    /// Perform one attempt at `command`, returning the domain event to
    /// append on success.
    ///
    /// # Errors
    ///
    /// Returns a human-readable error description on failure. The worker
    /// harness wraps this into a `work.failed` event; it never retries.
    fn handle<'a>(
        &'a self,
        command: &'a WorkCommand,
    ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>>;
}

/// Drive `worker` against its work topic until `shutdown` fires.
///
/// # Errors
///
/// Returns [`StageWorkerError::Subscription`] if the initial subscribe fails.
pub async fn run_stage_worker(
    worker: Arc<dyn StageWorker>,
    bus: Arc<dyn EventBus>,
    ledger: Arc<dyn EventLedger>,
    consumer_group: impl Into<String>,
    source: impl Into<String>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), StageWorkerError> {
    let topic = worker.work_type().topic().to_string();
    let source = source.into();
    tracing::info!(topic = %topic, "starting stage worker");

    let worker_loop = WorkerLoop::new(bus, vec![topic], consumer_group.into(), shutdown);

    worker_loop
        .run(move |event, _partition, _offset| {
            let worker = Arc::clone(&worker);
            let ledger = Arc::clone(&ledger);
            let source = source.clone();
            async move {
                let command = match decode_work_command(&event) {
                    Ok(command) => command,
                    Err(e) => {
                        tracing::error!(error = %e, event_id = %event.event_id, "could not decode work command, dropping");
                        return;
                    }
                };
                handle_one(&*worker, &command, &*ledger, &source).await;
            }
        })
        .await?;

    Ok(())
}

async fn handle_one(worker: &dyn StageWorker, command: &WorkCommand, ledger: &dyn EventLedger, source: &str) {
    let start = Instant::now();
    let result_event = match worker.handle(command).await {
        Ok(event) => {
            WorkerMetrics::record_processed(start.elapsed());
            event
        }
        Err(error) => {
            WorkerMetrics::record_failed();
            tracing::warn!(
                subject_id = %command.subject_id,
                attempt = command.attempt,
                error = %error,
                "stage worker attempt failed"
            );
            DomainEvent::WorkFailed(WorkFailed {
                work_message: command.clone(),
                error,
                agent: worker.agent_id().to_string(),
            })
        }
    };

    let new_event = completion_event(command, source, &result_event);
    if let Err(e) = ledger.append(new_event).await {
        tracing::error!(error = %e, subject_id = %command.subject_id, "failed to append worker result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifestream_core::domain::PublishCompleted;
    use lifestream_testing::in_memory::InMemoryEventLedger;
    use uuid::Uuid;

    struct AlwaysSucceeds;

    impl StageWorker for AlwaysSucceeds {
        fn work_type(&self) -> WorkType {
            WorkType::PublishLink
        }

        fn agent_id(&self) -> &str {
            "test-agent"
        }

        fn handle<'a>(
            &'a self,
            _command: &'a WorkCommand,
        ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>> {
            Box::pin(async { Ok(DomainEvent::PublishCompleted(PublishCompleted { published_at: None })) })
        }
    }

    struct AlwaysFails;

    impl StageWorker for AlwaysFails {
        fn work_type(&self) -> WorkType {
            WorkType::PublishLink
        }

        fn agent_id(&self) -> &str {
            "test-agent"
        }

        fn handle<'a>(
            &'a self,
            _command: &'a WorkCommand,
        ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>> {
            Box::pin(async { Err("boom".to_string()) })
        }
    }

    fn sample_command() -> WorkCommand {
        WorkCommand {
            subject_id: "link:abc123".parse().unwrap(),
            work_type: WorkType::PublishLink,
            correlation_id: Uuid::new_v4(),
            triggered_by_event_id: Uuid::new_v4(),
            attempt: 1,
            max_attempts: 3,
            created_at: chrono::Utc::now(),
            last_error: None,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn success_appends_the_stage_completion_event() {
        let ledger = InMemoryEventLedger::new();
        let command = sample_command();
        handle_one(&AlwaysSucceeds, &command, &ledger, "agent:publisher").await;

        let stored = ledger.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event_type, "publish.completed");
        assert_eq!(stored[0].subject_id, command.subject_id);
        assert_eq!(stored[0].causation_id, Some(command.triggered_by_event_id));
    }

    #[tokio::test]
    async fn failure_appends_work_failed_carrying_the_original_command() {
        let ledger = InMemoryEventLedger::new();
        let command = sample_command();
        handle_one(&AlwaysFails, &command, &ledger, "agent:publisher").await;

        let stored = ledger.all().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].event_type, "work.failed");
        let decoded = stored[0].decode().unwrap();
        match decoded {
            DomainEvent::WorkFailed(failed) => {
                assert_eq!(failed.error, "boom");
                assert_eq!(failed.work_message.subject_id, command.subject_id);
            }
            other => panic!("expected WorkFailed, got {other:?}"),
        }
    }
}
