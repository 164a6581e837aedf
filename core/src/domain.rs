//! The typed domain event catalog (spec §6) and the work/DLQ command shapes
//! the router and workers pass over the bus.
//!
//! Events are stored and transported as self-describing JSON documents
//! (see [`crate::event::StoredEvent`]); this module is the typed view a
//! handler decodes into at the boundary, per the design note in spec §9:
//! "Use tagged variants for event and work kinds rather than free-form
//! dispatch."

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject::SubjectId;

/// One variant per `event_type` in the event catalog. `#[serde(tag =
/// "event_type")]` makes the wire representation `{"event_type": "link.added",
/// ...fields}`, matching the dotted names used throughout the spec and the
/// bus topic/metric naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    /// A link was captured.
    #[serde(rename = "link.added")]
    LinkAdded(LinkAdded),
    /// A fetch worker finished (successfully or with a partial extraction failure).
    #[serde(rename = "content.fetched")]
    ContentFetched(ContentFetched),
    /// An enrich worker finished.
    #[serde(rename = "enrichment.completed")]
    EnrichmentCompleted(EnrichmentCompleted),
    /// A publish worker finished.
    #[serde(rename = "publish.completed")]
    PublishCompleted(PublishCompleted),
    /// A subject's visibility was changed (admin-originated).
    #[serde(rename = "link.visibility_changed")]
    LinkVisibilityChanged(LinkVisibilityChanged),
    /// A worker could not complete its unit of work.
    #[serde(rename = "work.failed")]
    WorkFailed(WorkFailed),
    /// A sensor reading was recorded.
    #[serde(rename = "temp.reading_recorded")]
    TempReadingRecorded(TempReadingRecorded),
    /// A todo item was created.
    #[serde(rename = "todo.created")]
    TodoCreated(TodoCreated),
    /// A todo item was completed.
    #[serde(rename = "todo.completed")]
    TodoCompleted(TodoCompleted),
    /// An annotation was attached to a link.
    #[serde(rename = "annotation.added")]
    AnnotationAdded(AnnotationAdded),
}

impl DomainEvent {
    /// The dotted `event_type` string for this variant, matching the name
    /// stored on [`crate::event::StoredEvent::event_type`].
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::LinkAdded(_) => "link.added",
            Self::ContentFetched(_) => "content.fetched",
            Self::EnrichmentCompleted(_) => "enrichment.completed",
            Self::PublishCompleted(_) => "publish.completed",
            Self::LinkVisibilityChanged(_) => "link.visibility_changed",
            Self::WorkFailed(_) => "work.failed",
            Self::TempReadingRecorded(_) => "temp.reading_recorded",
            Self::TodoCreated(_) => "todo.created",
            Self::TodoCompleted(_) => "todo.completed",
            Self::AnnotationAdded(_) => "annotation.added",
        }
    }
}

/// Payload of `link.added`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAdded {
    /// The raw URL as submitted by the capture client.
    pub url: String,
    /// The normalized form, if the capture client computed it itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_norm: Option<String>,
}

/// Payload of `content.fetched`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFetched {
    /// The URL after following redirects.
    pub final_url: String,
    /// Extracted page title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Extracted readable body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    /// Storage key for the raw HTML, if persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_storage_key: Option<String>,
    /// Set when extraction could not produce body text despite a valid
    /// response. A partial success, not a retryable failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

/// Payload of `enrichment.completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentCompleted {
    /// Discovered tags (3-7 per the enricher's contract).
    pub tags: Vec<String>,
    /// Short summary, at most 200 characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_short: Option<String>,
    /// Long-form summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_long: Option<String>,
    /// Detected language tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Identifier of the enriching model version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Payload of `publish.completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishCompleted {
    /// When publication happened, if distinct from `occurred_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Visibility value used by [`LinkVisibilityChanged`] and the subject registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to anyone who can reach the published site.
    Public,
    /// Excluded from publication.
    Private,
}

/// Payload of `link.visibility_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkVisibilityChanged {
    /// The new visibility.
    pub visibility: Visibility,
}

/// Payload of `work.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkFailed {
    /// The work command that could not be completed.
    pub work_message: WorkCommand,
    /// Human-readable error description.
    pub error: String,
    /// The worker instance/identity that reported the failure.
    pub agent: String,
}

/// Payload of `temp.reading_recorded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempReadingRecorded {
    /// Temperature in Celsius.
    pub celsius: f64,
    /// Relative humidity percentage, if the sensor reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Battery level, if the sensor reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

/// Payload of `todo.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoCreated {
    /// The todo's title.
    pub title: String,
    /// Project/list the todo belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Due date, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

/// Payload of `todo.completed`. Carries no fields of its own; the event
/// envelope's `subject_id` identifies which todo was completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoCompleted {}

/// Payload of `annotation.added`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationAdded {
    /// Unique identifier for the annotation itself.
    pub annotation_id: Uuid,
    /// The link subject this annotation is attached to.
    pub link_subject_id: SubjectId,
    /// Quoted passage, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Free-form note text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Selector locating the quote within the page, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Visibility of the annotation, defaulting to the link's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

/// A unit of work routed to a per-stage worker, per spec §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkCommand {
    /// The subject this work is about.
    pub subject_id: SubjectId,
    /// Which stage should process this command.
    pub work_type: WorkType,
    /// Ties this unit of work back to the pipeline run that produced it.
    pub correlation_id: Uuid,
    /// The event that caused the router to emit this command.
    pub triggered_by_event_id: Uuid,
    /// 1-indexed attempt counter.
    pub attempt: u32,
    /// Maximum attempts before this command is dead-lettered.
    pub max_attempts: u32,
    /// When this attempt was created.
    pub created_at: DateTime<Utc>,
    /// The error from the previous attempt, if this is a retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Stage-specific payload: the URL for fetch, title+text for enrich,
    /// empty for publish.
    pub payload: serde_json::Value,
}

/// The work stage a [`WorkCommand`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    /// Fetch the page content for a link.
    FetchLink,
    /// Enrich a link with tags/summaries.
    EnrichLink,
    /// Publish a link.
    PublishLink,
}

impl WorkType {
    /// The bus topic name this work type is routed through.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::FetchLink => "work.fetch_link",
            Self::EnrichLink => "work.enrich_link",
            Self::PublishLink => "work.publish_link",
        }
    }
}

/// A record placed on the dead-letter topic once a [`WorkCommand`] exhausts
/// its retries, per spec §4.4 and the `failed_work` table in `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The work command as it stood on its final, failed attempt.
    pub original_work: WorkCommand,
    /// The error from the final attempt.
    pub final_error: String,
    /// When the dead letter was recorded.
    pub failed_at: DateTime<Utc>,
    /// The worker instance/identity that reported the final failure.
    pub agent: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_added_round_trips_through_json() {
        let event = DomainEvent::LinkAdded(LinkAdded {
            url: "https://example.com/a".to_string(),
            url_norm: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "link.added");
        assert_eq!(json["url"], "https://example.com/a");

        let decoded: DomainEvent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.event_type(), "link.added");
    }

    #[test]
    fn work_failed_carries_the_original_command() {
        let work = WorkCommand {
            subject_id: "link:abc123".parse().unwrap(),
            work_type: WorkType::FetchLink,
            correlation_id: Uuid::nil(),
            triggered_by_event_id: Uuid::nil(),
            attempt: 3,
            max_attempts: 3,
            created_at: Utc::now(),
            last_error: Some("timeout".to_string()),
            payload: serde_json::json!({"url": "https://example.com/a"}),
        };
        let event = DomainEvent::WorkFailed(WorkFailed {
            work_message: work,
            error: "timeout".to_string(),
            agent: "fetcher-1".to_string(),
        });
        assert_eq!(event.event_type(), "work.failed");
    }

    #[test]
    fn work_type_topic_names_match_bus_catalog() {
        assert_eq!(WorkType::FetchLink.topic(), "work.fetch_link");
        assert_eq!(WorkType::EnrichLink.topic(), "work.enrich_link");
        assert_eq!(WorkType::PublishLink.topic(), "work.publish_link");
    }
}
