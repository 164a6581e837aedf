//! Postgres-backed [`IdempotencyLedger`] (spec §4.5).
//!
//! Same upsert-on-conflict shape as
//! [`crate::progress::PostgresConsumerProgressStore`], keyed instead by the
//! exact `(topic, partition, offset)` triple a handler is about to act on,
//! so the check-then-act can share a transaction with the side effect it
//! guards.

use chrono::{DateTime, Utc};
use lifestream_core::{IdempotencyError, IdempotencyLedger};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;

/// Tracks already-processed `(topic, partition, offset)` triples in the
/// `idempotency_ledger` table.
#[derive(Debug, Clone)]
pub struct PostgresIdempotencyLedger {
    pool: PgPool,
}

impl PostgresIdempotencyLedger {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl IdempotencyLedger for PostgresIdempotencyLedger {
    fn was_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, IdempotencyError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT 1 AS found FROM idempotency_ledger
                 WHERE topic = $1 AND partition = $2 AND kafka_offset = $3",
            )
            .bind(&topic)
            .bind(partition)
            .bind(offset)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IdempotencyError::Database(e.to_string()))?;

            Ok(row.is_some())
        })
    }

    fn mark_processed(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        processed_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), IdempotencyError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO idempotency_ledger (topic, partition, kafka_offset, processed_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (topic, partition, kafka_offset) DO NOTHING",
            )
            .bind(&topic)
            .bind(partition)
            .bind(offset)
            .bind(processed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| IdempotencyError::Database(e.to_string()))?;

            Ok(())
        })
    }
}

// Exercised against a real Postgres instance in tests/dlq_and_idempotency.rs
// (testcontainers-gated); there is nothing meaningful to unit test without
// a database connection.
