//! The distribution layer events are forwarded onto.
//!
//! Adapted from the teacher's `EventBus` trait: same dyn-compatible shape,
//! retargeted to carry [`StoredEvent`] records end to end instead of an
//! opaque binary-serialized envelope, since the bus payload is itself a
//! self-describing JSON document (spec §4.3).

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::event::StoredEvent;

/// Errors from publishing to or subscribing against the bus.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Could not establish or maintain a connection to the bus.
    #[error("failed to connect to event bus: {0}")]
    ConnectionFailed(String),
    /// A publish call failed.
    #[error("failed to publish to topic {topic}: {reason}")]
    PublishFailed {
        /// The topic that was being published to.
        topic: String,
        /// Why the publish failed.
        reason: String,
    },
    /// A subscribe call failed.
    #[error("failed to subscribe to topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that were being subscribed to.
        topics: Vec<String>,
        /// Why the subscription failed.
        reason: String,
    },
    /// A message on the bus could not be decoded.
    #[error("failed to deserialize event: {0}")]
    DeserializationFailed(String),
    /// A topic name was rejected by the bus.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    /// A consumer-group-level operation failed.
    #[error("consumer group error: {0}")]
    ConsumerGroupError(String),
    /// A lower-level transport error occurred mid-stream.
    #[error("transport error: {0}")]
    TransportError(String),
    /// Any other bus error.
    #[error("event bus error: {0}")]
    Other(String),
}

/// A stream of events received from a subscription, paired with their
/// partition and offset so callers that need manual offset control (the
/// materializer) can act on them.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<(StoredEvent, i32, i64), EventBusError>> + Send>>;

/// The earliest and latest available offset on one partition of a topic, as
/// the bus currently sees it. Used by spec §4.6's startup offset
/// reconciliation: a consumer compares these against what it has recorded to
/// decide where to seek on boot, instead of trusting a consumer-group
/// offset commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionWatermark {
    /// The partition this watermark describes.
    pub partition: i32,
    /// The lowest offset still retained on this partition.
    pub earliest: i64,
    /// One past the highest offset ever written to this partition.
    pub latest: i64,
}

/// The log-based message bus events and work commands are distributed
/// through.
///
/// `Send + Sync` with `Pin<Box<dyn Future<...> + Send + '_>>` returns so
/// implementations can live behind `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish `event` to `topic`, keyed by `key` (subject id, for
    /// partition affinity).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the bus rejects or
    /// cannot be reached for the publish.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        event: &'a StoredEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Subscribe to `topics` under `consumer_group`, starting from whatever
    /// offset the implementation's configuration dictates.
    ///
    /// No offset is ever committed back to the bus on this subscription;
    /// callers that need exactly-once effect track their own position (spec
    /// §4.6) via [`crate::ConsumerProgressStore`] and
    /// [`crate::IdempotencyLedger`] and, if they need to resume from a
    /// specific point, use [`EventBus::subscribe_from`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topics: &[&str],
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;

    /// The earliest and latest offset currently available on each partition
    /// of `topic`, used to bound the startup reconciliation decision (spec
    /// §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConsumerGroupError`] if the bus cannot
    /// report watermarks for `topic`.
    fn watermarks<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionWatermark>, EventBusError>> + Send + 'a>>;

    /// Subscribe to a single `topic`, seeking each listed partition to its
    /// given starting offset before yielding any message, bypassing
    /// whatever offset `consumer_group` may have previously committed at
    /// the broker. `consumer_group` is still used to identify the consumer
    /// for metrics/logging, not to resolve a starting position.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription or
    /// the seek cannot be established.
    fn subscribe_from<'a>(
        &'a self,
        topic: &'a str,
        consumer_group: &'a str,
        start_offsets: &'a [(i32, i64)],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failed_formats_topic_and_reason() {
        let err = EventBusError::PublishFailed {
            topic: "events.raw".to_string(),
            reason: "broker unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to publish to topic events.raw: broker unreachable"
        );
    }
}
