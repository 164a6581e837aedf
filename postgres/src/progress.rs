//! Postgres-backed [`ConsumerProgressStore`] (spec §4.5).
//!
//! The upsert-on-conflict shape is grounded on
//! `composable_rust_projections::postgres::PostgresProjectionCheckpoint`,
//! generalized from a single `projection_name` key to the finer-grained
//! `(consumer_role, topic, partition)` the router and materializer each
//! need, and made monotonic: an `UPDATE ... WHERE committed_offset <
//! EXCLUDED.committed_offset` guard stops a stale redelivery from ever
//! moving progress backward.

use lifestream_core::{ConsumerProgressStore, ProgressError};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Tracks `(consumer_role, topic, partition) -> committed_offset` in the
/// `consumer_progress` table.
#[derive(Debug, Clone)]
pub struct PostgresConsumerProgressStore {
    pool: PgPool,
}

impl PostgresConsumerProgressStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConsumerProgressStore for PostgresConsumerProgressStore {
    fn load_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
    ) -> Pin<Box<dyn Future<Output = Result<Option<i64>, ProgressError>> + Send + '_>> {
        let consumer_role = consumer_role.to_string();
        let topic = topic.to_string();
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT committed_offset FROM consumer_progress
                 WHERE consumer_role = $1 AND topic = $2 AND partition = $3",
            )
            .bind(&consumer_role)
            .bind(&topic)
            .bind(partition)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProgressError::Database(e.to_string()))?;

            Ok(row.map(|r| r.get::<i64, _>("committed_offset")))
        })
    }

    fn save_offset(
        &self,
        consumer_role: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProgressError>> + Send + '_>> {
        let consumer_role = consumer_role.to_string();
        let topic = topic.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO consumer_progress (consumer_role, topic, partition, committed_offset, updated_at)
                 VALUES ($1, $2, $3, $4, now())
                 ON CONFLICT (consumer_role, topic, partition) DO UPDATE
                 SET committed_offset = EXCLUDED.committed_offset, updated_at = now()
                 WHERE consumer_progress.committed_offset < EXCLUDED.committed_offset",
            )
            .bind(&consumer_role)
            .bind(&topic)
            .bind(partition)
            .bind(offset)
            .execute(&self.pool)
            .await
            .map_err(|e| ProgressError::Database(e.to_string()))?;

            Ok(())
        })
    }
}
