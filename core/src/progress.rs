//! Consumer progress, owned by the database rather than the bus (spec §4.5).
//!
//! The router and materializer never trust the bus's own consumer-group
//! offset commits for resuming after a restart: progress is read and
//! advanced inside the same transaction as the side effect it guards,
//! following the teacher's `ProjectionCheckpoint` save/load shape but keyed
//! finer-grained, by `(consumer_role, topic, partition)`, since a single
//! process may consume several topics independently.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from reading or advancing consumer progress.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    /// The underlying store could not complete the operation.
    #[error("progress store database error: {0}")]
    Database(String),
}

/// Tracks the last successfully processed offset per `(consumer_role,
/// topic, partition)`.
///
/// `Send + Sync` with `Pin<Box<dyn Future<...> + Send + '_>>` returns, same
/// shape as [`crate::EventLedger`], so a Postgres-backed implementation can
/// take part in the same transaction as the write it is guarding.
pub trait ConsumerProgressStore: Send + Sync {
    /// The last committed offset for this role/topic/partition, or `None`
    /// if this consumer has never processed anything on this partition.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Database`] if the query fails.
    fn load_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, ProgressError>> + Send + '_>>;

    /// Advance progress to `offset`. Implementations must make this an
    /// idempotent upsert: replaying the same offset is a no-op, and an
    /// older offset than what is stored must never move progress backward.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Database`] if the update fails.
    fn save_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProgressError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_is_descriptive() {
        let err = ProgressError::Database("connection reset".to_string());
        assert_eq!(err.to_string(), "progress store database error: connection reset");
    }
}
