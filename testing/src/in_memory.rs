//! In-memory implementations of every `lifestream-core` port.
//!
//! Lets the outbox forwarder, router, workers, and materializer be tested
//! end to end without a running Postgres or Redpanda, the same role the
//! teacher's mock environments played for the Store/Reducer test suite.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use lifestream_core::{
    ConsumerProgressStore, EventBus, EventBusError, EventLedger, EventLedgerError, EventStream,
    IdempotencyError, IdempotencyLedger, NewEvent, PartitionWatermark, ProgressError, StoredEvent,
};

/// An in-memory [`EventLedger`], ordered by insertion.
#[derive(Debug, Default)]
pub struct InMemoryEventLedger {
    events: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every event currently in the ledger, forwarded or not.
    pub async fn all(&self) -> Vec<StoredEvent> {
        self.events.lock().await.clone()
    }
}

impl EventLedger for InMemoryEventLedger {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<StoredEvent, EventLedgerError>> + Send + '_>> {
        Box::pin(async move {
            let stored = StoredEvent {
                event_id: Uuid::new_v4(),
                occurred_at: event.occurred_at,
                received_at: Utc::now(),
                source: event.source,
                subject_kind: event.subject_id.kind(),
                subject_id: event.subject_id,
                event_type: event.event_type,
                schema_version: event.schema_version,
                payload: event.payload,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                forwarded: false,
            };
            self.events.lock().await.push(stored.clone());
            Ok(stored)
        })
    }

    fn read_unforwarded(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventLedgerError>> + Send + '_>>
    {
        Box::pin(async move {
            let events = self.events.lock().await;
            Ok(events
                .iter()
                .filter(|e| !e.forwarded)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn mark_forwarded(
        &self,
        event_ids: &[Uuid],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLedgerError>> + Send + '_>> {
        let event_ids = event_ids.to_vec();
        Box::pin(async move {
            let mut events = self.events.lock().await;
            for event in events.iter_mut() {
                if event_ids.contains(&event.event_id) {
                    event.forwarded = true;
                }
            }
            Ok(())
        })
    }
}

#[derive(Default)]
struct TopicState {
    next_offset: i64,
    /// Every event ever published to this topic, in offset order, so
    /// `subscribe_from` can replay history the way a real broker retains it.
    history: Vec<StoredEvent>,
    subscribers: Vec<mpsc::UnboundedSender<Result<(StoredEvent, i32, i64), EventBusError>>>,
}

/// An in-memory [`EventBus`]. Each topic has a single fixed partition (0);
/// `subscribe` sees only messages published after it was called, matching
/// a fresh consumer group with no prior committed offset. `subscribe_from`
/// replays retained history from the given offset, matching a reconciling
/// consumer seeking against a real broker's log.
#[derive(Default)]
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, TopicState>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        _key: &'a str,
        event: &'a StoredEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_string()).or_default();
            let offset = state.next_offset;
            state.next_offset += 1;
            state.history.push(event.clone());
            state.subscribers.retain(|tx| !tx.is_closed());
            for tx in &state.subscribers {
                let _ = tx.send(Ok((event.clone(), 0, offset)));
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        _consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.topics.lock().await;
            for topic in topics {
                state.entry(topic).or_default().subscribers.push(tx.clone());
            }
            drop(state);
            let stream: EventStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }));
            Ok(stream)
        })
    }

    fn watermarks<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionWatermark>, EventBusError>> + Send + 'a>>
    {
        Box::pin(async move {
            let topics = self.topics.lock().await;
            let latest = topics.get(topic).map_or(0, |state| state.next_offset);
            Ok(vec![PartitionWatermark { partition: 0, earliest: 0, latest }])
        })
    }

    fn subscribe_from<'a>(
        &'a self,
        topic: &'a str,
        _consumer_group: &'a str,
        start_offsets: &'a [(i32, i64)],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + 'a>> {
        let topic = topic.to_string();
        let start_offset = start_offsets
            .iter()
            .find(|(partition, _)| *partition == 0)
            .map_or(0, |(_, offset)| *offset);

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.topics.lock().await;
            let topic_state = state.entry(topic.clone()).or_default();

            #[allow(clippy::cast_sign_loss)]
            let replay_from = start_offset.max(0) as usize;
            for (index, event) in topic_state.history.iter().enumerate().skip(replay_from) {
                #[allow(clippy::cast_possible_wrap)]
                let offset = index as i64;
                let _ = tx.send(Ok((event.clone(), 0, offset)));
            }

            topic_state.subscribers.push(tx);
            drop(state);

            let stream: EventStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }));
            Ok(stream)
        })
    }
}

/// An in-memory [`ConsumerProgressStore`]. Never moves an offset backward,
/// matching the durability guarantee a Postgres-backed implementation must
/// provide.
#[derive(Default)]
pub struct InMemoryConsumerProgressStore {
    offsets: Mutex<HashMap<(String, String, i32), i64>>,
}

impl InMemoryConsumerProgressStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsumerProgressStore for InMemoryConsumerProgressStore {
    fn load_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, ProgressError>> + Send + '_>> {
        let key = (consumer_role.to_string(), topic.to_string(), partition);
        Box::pin(async move { Ok(self.offsets.lock().await.get(&key).copied()) })
    }

    fn save_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProgressError>> + Send + '_>> {
        let key = (consumer_role.to_string(), topic.to_string(), partition);
        Box::pin(async move {
            let mut offsets = self.offsets.lock().await;
            let entry = offsets.entry(key).or_insert(offset);
            if offset > *entry {
                *entry = offset;
            }
            Ok(())
        })
    }
}

/// An in-memory [`IdempotencyLedger`].
#[derive(Default)]
pub struct InMemoryIdempotencyLedger {
    processed: Mutex<HashMap<(String, i32, i64), DateTime<Utc>>>,
}

impl InMemoryIdempotencyLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyLedger for InMemoryIdempotencyLedger {
    fn was_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, IdempotencyError>> + Send + '_>> {
        let key = (topic.to_string(), partition, offset);
        Box::pin(async move { Ok(self.processed.lock().await.contains_key(&key)) })
    }

    fn mark_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        processed_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let key = (topic.to_string(), partition, offset);
        Box::pin(async move {
            self.processed.lock().await.entry(key).or_insert(processed_at);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifestream_core::SubjectId;

    fn sample_event(subject: &str) -> StoredEvent {
        let subject_id: SubjectId = subject.parse().unwrap();
        StoredEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            received_at: Utc::now(),
            source: "chrome".to_string(),
            subject_kind: subject_id.kind(),
            subject_id,
            event_type: "link.added".to_string(),
            schema_version: 1,
            payload: serde_json::json!({"url": "https://example.com"}),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            forwarded: false,
        }
    }

    #[tokio::test]
    async fn ledger_append_then_read_unforwarded_then_mark_forwarded() {
        let ledger = InMemoryEventLedger::new();
        let event = NewEvent {
            occurred_at: Utc::now(),
            source: "chrome".to_string(),
            subject_id: "link:abc123".parse().unwrap(),
            event_type: "link.added".to_string(),
            schema_version: 1,
            payload: serde_json::json!({"url": "https://example.com/a"}),
            correlation_id: Uuid::new_v4(),
            causation_id: None,
        };
        let stored = ledger.append(event).await.unwrap();
        assert!(!stored.forwarded);

        let unforwarded = ledger.read_unforwarded(10).await.unwrap();
        assert_eq!(unforwarded.len(), 1);

        ledger.mark_forwarded(&[stored.event_id]).await.unwrap();
        let unforwarded = ledger.read_unforwarded(10).await.unwrap();
        assert!(unforwarded.is_empty());
    }

    #[tokio::test]
    async fn bus_subscriber_only_sees_messages_published_after_subscribing() {
        let bus = InMemoryEventBus::new();
        let early = sample_event("link:early");
        bus.publish("events.raw", "link:early", &early).await.unwrap();

        let mut stream = bus.subscribe(&["events.raw"], "test-group").await.unwrap();
        let late = sample_event("link:late");
        bus.publish("events.raw", "link:late", &late).await.unwrap();

        use futures::StreamExt;
        let (received, _partition, offset) = stream.next().await.unwrap().unwrap();
        assert_eq!(received.subject_id.as_str(), "link:late");
        assert_eq!(offset, 1); // "early" took offset 0 before the subscription existed
    }

    #[tokio::test]
    async fn progress_store_never_moves_backward() {
        let store = InMemoryConsumerProgressStore::new();
        store.save_offset("router", "events.raw", 0, 10).await.unwrap();
        store.save_offset("router", "events.raw", 0, 3).await.unwrap();
        let offset = store.load_offset("router", "events.raw", 0).await.unwrap();
        assert_eq!(offset, Some(10));
    }

    #[tokio::test]
    async fn idempotency_ledger_marks_and_checks() {
        let ledger = InMemoryIdempotencyLedger::new();
        assert!(!ledger.was_processed("work.fetch_link", 0, 5).await.unwrap());
        ledger
            .mark_processed("work.fetch_link", 0, 5, Utc::now())
            .await
            .unwrap();
        assert!(ledger.was_processed("work.fetch_link", 0, 5).await.unwrap());
    }
}
