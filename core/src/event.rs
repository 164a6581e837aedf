//! The ledger's event record (spec §3) and its self-describing wire form.
//!
//! Events are serialized as JSON, not a binary format: spec §4.3 requires
//! the outbox to publish "the full event record serialized as a
//! self-describing document," so a consumer that has never seen the
//! producer's binary layout (an operator's `jq`, a future language, a
//! schema-less log viewer) can still read it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::DomainEvent;
use crate::subject::{SubjectId, SubjectKind};

/// Errors from encoding or decoding a [`StoredEvent`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to encode an event to its wire form.
    #[error("failed to serialize event: {0}")]
    Serialization(String),
    /// Failed to decode an event from its wire form.
    #[error("failed to deserialize event: {0}")]
    Deserialization(String),
    /// `payload` did not match the shape expected for `event_type`.
    #[error("event type {event_type} has an unexpected payload shape: {reason}")]
    PayloadMismatch {
        /// The `event_type` string on the record.
        event_type: String,
        /// What went wrong decoding the payload.
        reason: String,
    },
}

/// An immutable fact appended to the ledger.
///
/// Matches spec §3's `Event` record exactly. `payload` is kept as a
/// `serde_json::Value` here (not a typed [`DomainEvent`]) so the ledger and
/// bus never need to know about new event types — handlers decode at the
/// boundary via [`StoredEvent::decode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique identifier for this event.
    pub event_id: Uuid,
    /// The source's own wall clock at the moment the fact occurred.
    pub occurred_at: DateTime<Utc>,
    /// The ledger's wall clock at the moment the event was appended.
    pub received_at: DateTime<Utc>,
    /// Where this event came from: `chrome`, `phone`, `agent:<name>`,
    /// `admin:<tool>`, `homeassistant`, etc.
    pub source: String,
    /// The kind half of the subject this event is about.
    pub subject_kind: SubjectKind,
    /// The subject this event is about.
    pub subject_id: SubjectId,
    /// The dotted event type, e.g. `"link.added"`.
    pub event_type: String,
    /// Payload schema version, default 1.
    pub schema_version: u32,
    /// The structured payload document.
    pub payload: serde_json::Value,
    /// Ties a pipeline run together. Never null for events emitted by workers.
    pub correlation_id: Uuid,
    /// The immediate triggering event's id, if any.
    pub causation_id: Option<Uuid>,
    /// Whether the outbox has successfully published this event to the bus.
    pub forwarded: bool,
}

impl StoredEvent {
    /// Decode `payload` into a typed [`DomainEvent`] by pairing it back up
    /// with `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::PayloadMismatch`] if `payload` does not match
    /// the shape [`DomainEvent`] expects for this record's `event_type`.
    pub fn decode(&self) -> Result<DomainEvent, EventError> {
        let mut tagged = self.payload.clone();
        if let serde_json::Value::Object(ref mut map) = tagged {
            map.insert(
                "event_type".to_string(),
                serde_json::Value::String(self.event_type.clone()),
            );
        }
        serde_json::from_value(tagged).map_err(|e| EventError::PayloadMismatch {
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }

    /// Serialize this record as a self-describing JSON document, the wire
    /// form the outbox publishes to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if encoding fails (should not
    /// happen for well-formed records).
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Decode a record previously produced by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if `bytes` is not a valid
    /// encoding of this type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// The fields a caller supplies when appending a new event; the ledger
/// generates `event_id` and `received_at` and always sets
/// `forwarded = false`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// The source's own wall clock at the moment the fact occurred.
    pub occurred_at: DateTime<Utc>,
    /// Where this event came from.
    pub source: String,
    /// The subject this event is about.
    pub subject_id: SubjectId,
    /// The dotted event type.
    pub event_type: String,
    /// Payload schema version.
    pub schema_version: u32,
    /// The structured payload document.
    pub payload: serde_json::Value,
    /// Ties a pipeline run together.
    pub correlation_id: Uuid,
    /// The immediate triggering event's id, if any.
    pub causation_id: Option<Uuid>,
}

impl NewEvent {
    /// Build a [`NewEvent`] from a typed [`DomainEvent`], encoding its
    /// payload and deriving `event_type` from the variant.
    #[must_use]
    pub fn from_domain_event(
        subject_id: SubjectId,
        source: impl Into<String>,
        occurred_at: DateTime<Utc>,
        correlation_id: Uuid,
        causation_id: Option<Uuid>,
        event: &DomainEvent,
    ) -> Self {
        let mut payload = serde_json::to_value(event)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(ref mut map) = payload {
            map.remove("event_type");
        }
        Self {
            occurred_at,
            source: source.into(),
            subject_id,
            event_type: event.event_type().to_string(),
            schema_version: 1,
            payload,
            correlation_id,
            causation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LinkAdded;

    fn sample_event() -> StoredEvent {
        StoredEvent {
            event_id: Uuid::nil(),
            occurred_at: Utc::now(),
            received_at: Utc::now(),
            source: "chrome".to_string(),
            subject_kind: SubjectKind::Link,
            subject_id: "link:abc123".parse().unwrap(),
            event_type: "link.added".to_string(),
            schema_version: 1,
            payload: serde_json::json!({"url": "https://example.com/a"}),
            correlation_id: Uuid::nil(),
            causation_id: None,
            forwarded: false,
        }
    }

    #[test]
    fn to_bytes_from_bytes_round_trips() {
        let event = sample_event();
        let bytes = event.to_bytes().unwrap();
        let decoded = StoredEvent::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.event_id, event.event_id);
        assert_eq!(decoded.event_type, "link.added");
    }

    #[test]
    fn decode_recovers_typed_domain_event() {
        let event = sample_event();
        let domain = event.decode().unwrap();
        match domain {
            DomainEvent::LinkAdded(LinkAdded { url, .. }) => {
                assert_eq!(url, "https://example.com/a");
            }
            other => panic!("expected LinkAdded, got {other:?}"),
        }
    }

    #[test]
    fn from_domain_event_sets_event_type_and_strips_tag_from_payload() {
        let event = DomainEvent::LinkAdded(LinkAdded {
            url: "https://example.com/a".to_string(),
            url_norm: None,
        });
        let new_event = NewEvent::from_domain_event(
            "link:abc123".parse().unwrap(),
            "chrome",
            Utc::now(),
            Uuid::nil(),
            None,
            &event,
        );
        assert_eq!(new_event.event_type, "link.added");
        assert!(new_event.payload.get("event_type").is_none());
    }

    #[test]
    fn wire_bytes_are_human_readable_json() {
        let event = sample_event();
        let bytes = event.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"event_type\":\"link.added\""));
    }
}
