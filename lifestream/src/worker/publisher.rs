//! The publish worker (spec §4.5): the terminal stage of the pipeline.
//!
//! There is nothing left to compute by the time a link reaches
//! `work.publish_link` — fetch and enrich already did the work, and
//! `lifestream_projections` derives the actual published-site materialization
//! from the event stream. Publishing here means: record that publication
//! happened. The materializer owns rendering the public output.

use lifestream_core::domain::{DomainEvent, PublishCompleted, WorkCommand, WorkType};
use std::future::Future;
use std::pin::Pin;

use super::StageWorker;

/// Records that a link's publish step ran.
pub struct Publisher {
    agent_id: String,
}

impl Publisher {
    /// Build a publisher identified as `agent_id` on `work.failed` records.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }
}

impl StageWorker for Publisher {
    fn work_type(&self) -> WorkType {
        WorkType::PublishLink
    }

    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn handle<'a>(
        &'a self,
        _command: &'a WorkCommand,
    ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>> {
        Box::pin(async move {
            Ok(DomainEvent::PublishCompleted(PublishCompleted {
                published_at: None,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifestream_core::domain::WorkCommand;
    use lifestream_core::subject::{SubjectId, SubjectKind};
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_always_succeeds() {
        let publisher = Publisher::new("publisher-test");
        let command = WorkCommand {
            subject_id: SubjectId::new(SubjectKind::Link, "abc"),
            work_type: WorkType::PublishLink,
            correlation_id: Uuid::new_v4(),
            triggered_by_event_id: Uuid::new_v4(),
            attempt: 1,
            max_attempts: 3,
            created_at: chrono::Utc::now(),
            last_error: None,
            payload: serde_json::json!({}),
        };
        let event = publisher.handle(&command).await.unwrap();
        assert!(matches!(event, DomainEvent::PublishCompleted(_)));
    }
}
