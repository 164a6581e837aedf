//! Redpanda-backed [`EventBus`] for the lifestream pipeline.
//!
//! Uses rdkafka (Kafka-compatible client) to publish and consume the
//! self-describing JSON event records the rest of the pipeline works with.
//!
//! # Why Redpanda?
//!
//! - **Kafka-compatible**: works with any Kafka-compatible broker.
//! - **Vendor swappable**: Redpanda, Apache Kafka, AWS MSK, Azure Event Hubs.
//! - **Self-hostable**: Docker, Kubernetes, bare metal.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery, no consumer-group offset commits at all**:
//! - `enable.auto.commit` is off and this bus never calls
//!   `commit_message`/`commit`. The broker's committed position for any
//!   group is never advanced, so it can never race ahead of a subscriber's
//!   own durable bookkeeping.
//! - Every message may be delivered more than once (at minimum, on every
//!   process restart, since there is no committed offset to resume from).
//!   Handlers must be idempotent; see `lifestream-core`'s
//!   `IdempotencyLedger` and `ConsumerProgressStore` for how the rest of the
//!   pipeline gets an exactly-once effect out of this.
//! - A caller that needs to resume from a specific point rather than
//!   replaying from the start uses `EventBus::subscribe_from` with offsets
//!   it derived from its own `ConsumerProgressStore` (spec §4.6's startup
//!   offset reconciliation) alongside `EventBus::watermarks`.
//! - Ordering is guaranteed within a partition. Messages are keyed by
//!   subject id, so every event about the same link/sensor/todo lands on
//!   the same partition and is seen in order.
//!
//! # Example
//!
//! ```no_run
//! use lifestream_redpanda::RedpandaEventBus;
//! use lifestream_core::EventBus;
//! use lifestream_core::event::StoredEvent;
//! use futures::StreamExt;
//!
//! # async fn example(event: StoredEvent) -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//! event_bus.publish("events.raw", event.subject_id.as_str(), &event).await?;
//!
//! let mut stream = event_bus.subscribe(&["events.raw"], "router").await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok((event, partition, offset)) => {
//!             println!("received {} at {partition}:{offset}", event.event_type);
//!         }
//!         Err(e) => eprintln!("error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use lifestream_core::event::StoredEvent;
use lifestream_core::event_bus::{EventBus, EventBusError, EventStream, PartitionWatermark};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Redpanda-backed event bus.
///
/// - **At-least-once delivery**: messages may be delivered multiple times.
/// - **Ordering within partition**: events about the same subject stay in
///   order, since they share a partition key.
/// - **Consumer groups**: multiple worker instances share the workload.
///
/// # Configuration
///
/// - **Broker addresses**: bootstrap servers (required).
/// - **Producer settings**: acks, compression, timeout.
/// - **Buffer size**: per-subscription channel capacity (default: 1000).
/// - **Offset reset**: where new consumer groups start reading (default:
///   "earliest", since the pipeline must not silently skip history).
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot
    /// be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get the configured broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all". Default "1".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the per-subscription channel buffer size. Default 1000.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is 0.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set the auto offset reset policy for new consumer groups: "earliest"
    /// or "latest". Default "earliest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set
    /// or the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("brokers not configured".to_string()))?;

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.producer_acks.as_deref().unwrap_or("1"))
            .set(
                "compression.type",
                self.compression.as_deref().unwrap_or("none"),
            );

        let producer: FutureProducer = producer_config
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = self.producer_acks.as_deref().unwrap_or("1"),
            compression = self.compression.as_deref().unwrap_or("none"),
            buffer_size = self.buffer_size.unwrap_or(1000),
            auto_offset_reset = self.auto_offset_reset.as_deref().unwrap_or("earliest"),
            "redpanda event bus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size: self.buffer_size.unwrap_or(1000),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        event: &'a StoredEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = event.to_bytes().map_err(|e| EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: format!("failed to serialize event: {e}"),
            })?;

            let headers = rdkafka::message::OwnedHeaders::new()
                .insert(rdkafka::message::Header {
                    key: "event_type",
                    value: Some(event.event_type.as_str()),
                })
                .insert(rdkafka::message::Header {
                    key: "source",
                    value: Some(event.source.as_str()),
                });

            let record = FutureRecord::to(topic)
                .payload(&payload)
                .key(key)
                .headers(headers);

            let send_result = self.producer.send(record, Timeout::After(self.timeout)).await;

            match send_result {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_type = %event.event_type,
                        subject_id = %event.subject_id,
                        "published event"
                    );
                    metrics::counter!("outbox_publish_total", "topic" => topic.to_string())
                        .increment(1);
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "failed to publish event");
                    metrics::counter!("outbox_publish_errors_total", "topic" => topic.to_string())
                        .increment(1);
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let consumer_group = consumer_group.to_string();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(buffer_size);
            tokio::spawn(consume_loop(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn watermarks<'a>(
        &'a self,
        topic: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PartitionWatermark>, EventBusError>> + Send + 'a>>
    {
        let topic = topic.to_string();
        let brokers = self.brokers.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", "lifestream-watermark-probe")
                .set("enable.auto.commit", "false")
                .create()
                .map_err(|e| {
                    EventBusError::ConsumerGroupError(format!(
                        "failed to create watermark probe consumer: {e}"
                    ))
                })?;

            let metadata = consumer
                .fetch_metadata(Some(&topic), Timeout::After(timeout))
                .map_err(|e| {
                    EventBusError::ConsumerGroupError(format!(
                        "failed to fetch metadata for topic {topic}: {e}"
                    ))
                })?;

            let Some(topic_metadata) = metadata.topics().iter().find(|t| t.name() == topic) else {
                return Err(EventBusError::ConsumerGroupError(format!(
                    "topic {topic} not found in cluster metadata"
                )));
            };

            let mut watermarks = Vec::with_capacity(topic_metadata.partitions().len());
            for partition_metadata in topic_metadata.partitions() {
                let partition = partition_metadata.id();
                let (earliest, latest) = consumer
                    .fetch_watermarks(&topic, partition, Timeout::After(timeout))
                    .map_err(|e| {
                        EventBusError::ConsumerGroupError(format!(
                            "failed to fetch watermarks for {topic}:{partition}: {e}"
                        ))
                    })?;
                watermarks.push(PartitionWatermark { partition, earliest, latest });
            }

            Ok(watermarks)
        })
    }

    fn subscribe_from<'a>(
        &'a self,
        topic: &'a str,
        consumer_group: &'a str,
        start_offsets: &'a [(i32, i64)],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + 'a>> {
        let topic = topic.to_string();
        let consumer_group = consumer_group.to_string();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let start_offsets = start_offsets.to_vec();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: vec![topic.clone()],
                    reason: format!("failed to create consumer: {e}"),
                })?;

            let mut assignment = TopicPartitionList::new();
            for &(partition, offset) in &start_offsets {
                assignment
                    .add_partition_offset(&topic, partition, Offset::Offset(offset))
                    .map_err(|e| EventBusError::SubscriptionFailed {
                        topics: vec![topic.clone()],
                        reason: format!(
                            "failed to set start offset {offset} on partition {partition}: {e}"
                        ),
                    })?;
            }
            consumer.assign(&assignment).map_err(|e| EventBusError::SubscriptionFailed {
                topics: vec![topic.clone()],
                reason: format!("failed to assign partitions: {e}"),
            })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                start_offsets = ?start_offsets,
                "subscribed to topic from reconciled offsets"
            );

            let (tx, rx) = mpsc::channel(buffer_size);
            tokio::spawn(consume_loop(consumer, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

/// Forward every message on `consumer`'s assignment to `tx` until the
/// receiver is dropped. Never commits an offset back to the broker: the
/// caller (the router, a stage worker, or the materializer) owns its own
/// durable position via `IdempotencyLedger`/`ConsumerProgressStore`.
async fn consume_loop(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<(StoredEvent, i32, i64), EventBusError>>,
) {
    use futures::StreamExt;

    let mut stream = consumer.stream();

    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(message) => {
                let partition = message.partition();
                let offset = message.offset();

                let Some(payload) = message.payload() else {
                    let err = EventBusError::DeserializationFailed("message has no payload".to_string());
                    if tx.send(Err(err)).await.is_err() {
                        break;
                    }
                    continue;
                };

                let event_result = match StoredEvent::from_bytes(payload) {
                    Ok(event) => {
                        tracing::trace!(
                            topic = message.topic(),
                            partition,
                            offset,
                            event_type = %event.event_type,
                            "received event"
                        );
                        Ok((event, partition, offset))
                    }
                    Err(e) => Err(EventBusError::DeserializationFailed(format!(
                        "failed to deserialize event: {e}"
                    ))),
                };

                if tx.send(event_result).await.is_err() {
                    tracing::debug!("channel receiver dropped, exiting consumer task");
                    break;
                }
            }
            Err(e) => {
                let err = EventBusError::TransportError(format!("failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("consumer task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn builder_default_works() {
        let _builder = RedpandaEventBus::builder();
    }

    #[test]
    fn builder_rejects_missing_brokers() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    #[should_panic(expected = "buffer_size must be greater than 0")]
    fn builder_rejects_zero_buffer_size() {
        let _ = RedpandaEventBus::builder().brokers("localhost:9092").buffer_size(0);
    }
}
