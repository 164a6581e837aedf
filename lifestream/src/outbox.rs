//! The outbox forwarder (spec §4.3): the only process that moves events
//! from the ledger onto the bus.
//!
//! Cycle: read a batch of unforwarded events, publish each keyed by subject
//! id, mark the batch forwarded once every publish in it has succeeded.
//! A publish failure does not advance any offset-equivalent state — the
//! event is simply retried on the next cycle — so this loop only needs
//! exponential backoff between cycles, not per-event retry bookkeeping.
//! Grounded on [`lifestream_runtime::retry::RetryPolicy`] (base 1s, factor
//! 2, cap 30s, matching spec §4.3 exactly) and
//! [`lifestream_runtime::metrics::OutboxMetrics`].

use lifestream_core::event::StoredEvent;
use lifestream_core::event_bus::EventBus;
use lifestream_core::ledger::EventLedger;
use lifestream_runtime::metrics::OutboxMetrics;
use lifestream_runtime::retry::RetryPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Errors from running the outbox forwarder.
#[derive(thiserror::Error, Debug)]
pub enum OutboxError {
    /// The configured number of consecutive publish-cycle failures was
    /// reached; the process should exit non-zero rather than spin forever
    /// against a bus that refuses every publish.
    #[error("outbox forwarder gave up after {0} consecutive failed cycles")]
    ConsecutiveFailuresExceeded(u32),
}

/// Reads unforwarded events from the ledger and republishes them to the bus.
pub struct OutboxForwarder {
    ledger: Arc<dyn EventLedger>,
    bus: Arc<dyn EventBus>,
    topic: String,
    batch_size: usize,
    poll_interval: Duration,
    max_consecutive_failures: u32,
    retry_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl OutboxForwarder {
    /// Build a forwarder publishing onto `topic` (normally `events.raw`).
    #[must_use]
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger,
            bus,
            topic: topic.into(),
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            max_consecutive_failures: 5,
            retry_policy: RetryPolicy::builder()
                .max_retries(5)
                .initial_delay(Duration::from_secs(1))
                .max_delay(Duration::from_secs(30))
                .multiplier(2.0)
                .build(),
            shutdown,
        }
    }

    /// Run cycles until the shutdown channel fires.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::ConsecutiveFailuresExceeded`] once
    /// `max_consecutive_failures` cycles in a row fail to forward anything —
    /// a signal to the process supervisor that the bus is unreachable, not
    /// a message the forwarder can retry its way out of.
    pub async fn run(&mut self) -> Result<(), OutboxError> {
        tracing::info!(topic = %self.topic, "starting outbox forwarder");
        let mut consecutive_failures = 0u32;

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("outbox forwarder shutting down");
                return Ok(());
            }

            match self.run_cycle().await {
                Ok(forwarded) => {
                    consecutive_failures = 0;
                    if forwarded == 0 {
                        tokio::select! {
                            () = tokio::time::sleep(self.poll_interval) => {}
                            _ = self.shutdown.changed() => {}
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    OutboxMetrics::record_publish_error();
                    tracing::error!(
                        error = %e,
                        consecutive_failures,
                        "outbox forward cycle failed"
                    );
                    if consecutive_failures >= self.max_consecutive_failures {
                        return Err(OutboxError::ConsecutiveFailuresExceeded(consecutive_failures));
                    }
                    let delay = self.retry_policy.delay_for_attempt(consecutive_failures as usize);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Run a single read-publish-mark cycle.
    async fn run_cycle(&self) -> Result<usize, lifestream_core::event_bus::EventBusError> {
        let batch = self
            .ledger
            .read_unforwarded(self.batch_size)
            .await
            .map_err(|e| lifestream_core::event_bus::EventBusError::Other(e.to_string()))?;

        OutboxMetrics::record_lag(batch.len());
        if batch.is_empty() {
            return Ok(0);
        }

        let start = Instant::now();
        let mut forwarded_ids = Vec::with_capacity(batch.len());
        for event in &batch {
            self.publish_one(event).await?;
            forwarded_ids.push(event.event_id);
        }

        self.ledger
            .mark_forwarded(&forwarded_ids)
            .await
            .map_err(|e| lifestream_core::event_bus::EventBusError::Other(e.to_string()))?;

        OutboxMetrics::record_forwarded(forwarded_ids.len(), start.elapsed());
        tracing::debug!(count = forwarded_ids.len(), "forwarded batch");

        Ok(forwarded_ids.len())
    }

    async fn publish_one(
        &self,
        event: &StoredEvent,
    ) -> Result<(), lifestream_core::event_bus::EventBusError> {
        self.bus
            .publish(&self.topic, event.subject_id.as_str(), event)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifestream_core::domain::{DomainEvent, LinkAdded};
    use lifestream_core::event::NewEvent;
    use lifestream_testing::in_memory::{InMemoryEventBus, InMemoryEventLedger};
    use std::sync::Arc;

    fn sample_new_event() -> NewEvent {
        let event = DomainEvent::LinkAdded(LinkAdded {
            url: "https://example.com/a".to_string(),
            url_norm: None,
        });
        NewEvent::from_domain_event(
            "link:abc123".parse().unwrap(),
            "test",
            chrono::Utc::now(),
            uuid::Uuid::new_v4(),
            None,
            &event,
        )
    }

    #[tokio::test]
    async fn forwards_unforwarded_events_and_marks_them_forwarded() {
        let ledger: Arc<dyn EventLedger> = Arc::new(InMemoryEventLedger::new());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        ledger.append(sample_new_event()).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let forwarder = OutboxForwarder::new(
            Arc::clone(&ledger),
            bus,
            "events.raw".to_string(),
            rx,
        );
        let forwarded = forwarder.run_cycle().await.unwrap();
        assert_eq!(forwarded, 1);

        let remaining = ledger.read_unforwarded(10).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn empty_ledger_forwards_nothing() {
        let ledger: Arc<dyn EventLedger> = Arc::new(InMemoryEventLedger::new());
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
        let (_tx, rx) = watch::channel(false);
        let forwarder = OutboxForwarder::new(ledger, bus, "events.raw".to_string(), rx);
        assert_eq!(forwarder.run_cycle().await.unwrap(), 0);
    }
}
