//! A generic consumer loop shared by the router, per-stage workers, and the
//! materializer.
//!
//! Mirrors the teacher's `ProjectionManager::start` shape — subscribe once,
//! then `tokio::select!` between the next message and a shutdown watch
//! channel — but leaves what "handling" a message means to the caller,
//! since the router, workers, and materializer each need a different
//! transaction boundary around the handler (see spec §4.4 and §4.6).

use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lifestream_core::{EventBus, EventBusError, StoredEvent};

/// Drives a subscription until told to stop.
pub struct WorkerLoop {
    bus: Arc<dyn EventBus>,
    topics: Vec<String>,
    consumer_group: String,
    shutdown: watch::Receiver<bool>,
    start_offsets: Option<Vec<(i32, i64)>>,
}

impl WorkerLoop {
    /// Build a loop over `topics` under `consumer_group`, stopping when
    /// `shutdown` is set to `true`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        topics: Vec<String>,
        consumer_group: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            topics,
            consumer_group: consumer_group.into(),
            shutdown,
            start_offsets: None,
        }
    }

    /// Subscribe from reconciled per-partition offsets instead of letting
    /// the bus pick a starting position. Only meaningful for a single-topic
    /// loop (the materializer's use case); calling `run` with more than one
    /// topic configured alongside this ignores the extra topics.
    #[must_use]
    pub fn with_start_offsets(mut self, start_offsets: Vec<(i32, i64)>) -> Self {
        self.start_offsets = Some(start_offsets);
        self
    }

    /// Run until the shutdown signal fires or the underlying stream ends.
    ///
    /// `handle` receives the decoded event along with its partition and
    /// offset; it is responsible for its own retry, idempotency, and
    /// offset-advancement logic, since those differ per caller.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] if the initial subscription fails.
    pub async fn run<F, Fut>(mut self, mut handle: F) -> Result<(), EventBusError>
    where
        F: FnMut(StoredEvent, i32, i64) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let mut stream = match &self.start_offsets {
            Some(start_offsets) => {
                let topic = self.topics.first().map(String::as_str).unwrap_or_default();
                self.bus.subscribe_from(topic, &self.consumer_group, start_offsets).await?
            }
            None => {
                let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
                self.bus.subscribe(&topic_refs, &self.consumer_group).await?
            }
        };
        info!(
            topics = ?self.topics,
            consumer_group = %self.consumer_group,
            "worker loop started"
        );

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!(consumer_group = %self.consumer_group, "worker loop shutting down");
                        break;
                    }
                }
                next = stream.next() => {
                    match next {
                        Some(Ok((event, partition, offset))) => {
                            handle(event, partition, offset).await;
                        }
                        Some(Err(err)) => {
                            error!(error = %err, "worker loop stream error");
                        }
                        None => {
                            warn!(consumer_group = %self.consumer_group, "worker loop stream ended");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use lifestream_core::{EventStream, PartitionWatermark, SubjectKind};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct StubBus {
        events: Vec<StoredEvent>,
    }

    fn sample_event() -> StoredEvent {
        StoredEvent {
            event_id: Uuid::nil(),
            occurred_at: chrono::Utc::now(),
            received_at: chrono::Utc::now(),
            source: "test".to_string(),
            subject_kind: SubjectKind::Link,
            subject_id: "link:abc".parse().unwrap(),
            event_type: "link.added".to_string(),
            schema_version: 1,
            payload: serde_json::json!({"url": "https://example.com"}),
            correlation_id: Uuid::nil(),
            causation_id: None,
            forwarded: false,
        }
    }

    impl EventBus for StubBus {
        fn publish<'a>(
            &'a self,
            _topic: &'a str,
            _key: &'a str,
            _event: &'a StoredEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _topics: &[&str],
            _consumer_group: &str,
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            let items: Vec<Result<(StoredEvent, i32, i64), EventBusError>> = self
                .events
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, e)| Ok((e, 0, i as i64)))
                .collect();
            Box::pin(async move {
                let s: EventStream = Box::pin(stream::iter(items));
                Ok(s)
            })
        }

        fn watermarks<'a>(
            &'a self,
            _topic: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionWatermark>, EventBusError>> + Send + 'a>>
        {
            let latest = self.events.len() as i64;
            Box::pin(async move { Ok(vec![PartitionWatermark { partition: 0, earliest: 0, latest }]) })
        }

        fn subscribe_from<'a>(
            &'a self,
            _topic: &'a str,
            _consumer_group: &'a str,
            start_offsets: &'a [(i32, i64)],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + 'a>> {
            let start = start_offsets.first().map_or(0, |(_, offset)| *offset);
            let items: Vec<Result<(StoredEvent, i32, i64), EventBusError>> = self
                .events
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, e)| Ok((e, 0, i as i64)))
                .filter(|item| matches!(item, Ok((_, _, offset)) if *offset >= start))
                .collect();
            Box::pin(async move {
                let s: EventStream = Box::pin(stream::iter(items));
                Ok(s)
            })
        }
    }

    #[tokio::test]
    async fn run_invokes_handler_for_each_message_then_stops_on_shutdown() {
        let bus: Arc<dyn EventBus> = Arc::new(StubBus {
            events: vec![sample_event(), sample_event()],
        });
        let (tx, rx) = watch::channel(false);
        let loop_ = WorkerLoop::new(bus, vec!["events.raw".to_string()], "test-group", rx);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        tokio::spawn(async move {
            loop_
                .run(move |_event, _partition, _offset| {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                    async {}
                })
                .await
                .unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
