//! Application state for the ingestion HTTP server.

use lifestream_core::ledger::EventLedger;
use lifestream_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Holds the event ledger behind a trait object so handlers depend only on
/// [`EventLedger`], never on `lifestream-postgres` directly — the same
/// seam the ingestion endpoint, the outbox forwarder, and the admin CLI all
/// share.
#[derive(Clone)]
pub struct AppState {
    /// The durable event ledger new events are appended to.
    pub ledger: Arc<dyn EventLedger>,
    /// Source label stamped on events this process appends.
    pub source: Arc<str>,
    /// Shared metrics server, rendered by the `/metrics` route.
    pub metrics: Arc<MetricsServer>,
}

impl AppState {
    /// Build application state from its dependencies.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn EventLedger>,
        source: impl Into<Arc<str>>,
        metrics: Arc<MetricsServer>,
    ) -> Self {
        Self {
            ledger,
            source: source.into(),
            metrics,
        }
    }
}
