//! Exactly-once-effect tracking on top of an at-least-once bus (spec §4.5).
//!
//! At-least-once delivery means a worker or materializer may see the same
//! `(topic, partition, offset)` twice after a crash-and-redeliver. This
//! ledger lets a handler check, inside the same transaction as its side
//! effect, whether that exact message has already been processed, and
//! record that it has — the same idea as the teacher's dead-letter
//! bookkeeping in `postgres/src/dead_letter_queue.rs`, applied to
//! successful processing instead of failure.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from checking or recording message idempotency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    /// The underlying store could not complete the operation.
    #[error("idempotency ledger database error: {0}")]
    Database(String),
}

/// Records which `(topic, partition, offset)` triples have already had
/// their side effects applied.
///
/// `Send + Sync` with `Pin<Box<dyn Future<...> + Send + '_>>` returns, so a
/// Postgres-backed implementation can take part in the same transaction as
/// the projection write or outbox append it is guarding.
pub trait IdempotencyLedger: Send + Sync {
    /// Whether `(topic, partition, offset)` has already been recorded as
    /// processed.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Database`] if the query fails.
    fn was_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, IdempotencyError>> + Send + '_>>;

    /// Record `(topic, partition, offset)` as processed at `processed_at`.
    /// Must be safe to call twice with the same key (second call is a
    /// no-op), since a crash between recording and commit can cause a retry.
    ///
    /// # Errors
    ///
    /// Returns [`IdempotencyError::Database`] if the insert fails.
    fn mark_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        processed_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_is_descriptive() {
        let err = IdempotencyError::Database("duplicate key".to_string());
        assert_eq!(
            err.to_string(),
            "idempotency ledger database error: duplicate key"
        );
    }
}
