//! The append-only event ledger (spec §4.2): the pipeline's source of truth.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

use crate::event::{NewEvent, StoredEvent};

/// Errors from ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLedgerError {
    /// The underlying store could not complete the operation.
    #[error("ledger database error: {0}")]
    Database(String),
    /// A record could not be encoded or decoded.
    #[error("ledger serialization error: {0}")]
    Serialization(String),
}

/// The durable, append-only event ledger.
///
/// `Send + Sync` with `Pin<Box<dyn Future<...> + Send + '_>>` return types
/// (rather than `impl Future`) so implementations can be held behind
/// `Arc<dyn EventLedger>` and shared across the outbox forwarder, the HTTP
/// ingestion endpoint, and the admin CLI.
///
/// Unlike a classic event-sourced aggregate store, this ledger has no
/// per-subject version counter: `spec.md` explicitly allows concurrent,
/// order-independent appends across subjects, so there is nothing to do
/// optimistic-concurrency checks against.
pub trait EventLedger: Send + Sync {
    /// Append a new event. Always inserts with `forwarded = false`. Fails
    /// only on infrastructure error.
    ///
    /// # Errors
    ///
    /// Returns [`EventLedgerError::Database`] if the underlying store is
    /// unreachable or rejects the insert.
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<StoredEvent, EventLedgerError>> + Send + '_>>;

    /// Read up to `limit` events with `forwarded = false`, ordered by
    /// `received_at` ascending, tie-broken by `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLedgerError::Database`] if the query fails.
    fn read_unforwarded(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventLedgerError>> + Send + '_>>;

    /// Mark the given events forwarded. Safe to call with already-forwarded
    /// ids (no-op per row).
    ///
    /// # Errors
    ///
    /// Returns [`EventLedgerError::Database`] if the update fails.
    fn mark_forwarded(
        &self,
        event_ids: &[Uuid],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLedgerError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = EventLedgerError::Database("connection refused".to_string());
        assert_eq!(err.to_string(), "ledger database error: connection refused");
    }
}
