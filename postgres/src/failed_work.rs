//! Dead-letter queue for work commands that exhausted their retries
//! (spec §4.4).
//!
//! Adapted from `DeadLetterQueue`/`FailedEvent` in the teacher's
//! `dead_letter_queue.rs`: same status machine and raw-SQL/tracing/metrics
//! style, retargeted from a generic `SerializedEvent` onto the pipeline's
//! own [`DeadLetter`]/[`WorkCommand`] shapes, over a `failed_work` table
//! instead of `failed_events`.

use chrono::{DateTime, Utc};
use lifestream_core::{DeadLetter, WorkCommand};
use sqlx::{PgPool, Row};

/// Errors from dead-letter queue operations.
#[derive(thiserror::Error, Debug)]
pub enum FailedWorkError {
    /// The underlying store could not complete the operation.
    #[error("failed work queue database error: {0}")]
    Database(String),
    /// A stored status string did not match a known [`FailedWorkStatus`].
    #[error("invalid failed work status: {0}")]
    InvalidStatus(String),
}

/// Status of an entry in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedWorkStatus {
    /// Pending investigation/reprocessing.
    Pending,
    /// Currently being investigated or retried by an operator.
    Processing,
    /// Reprocessed successfully.
    Resolved,
    /// Permanently discarded (cannot be fixed, or no longer relevant).
    Discarded,
}

impl FailedWorkStatus {
    /// Convert to the database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::InvalidStatus`] if `s` is not a known status.
    pub fn parse(s: &str) -> Result<Self, FailedWorkError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            other => Err(FailedWorkError::InvalidStatus(other.to_string())),
        }
    }
}

/// An entry in the dead-letter queue: a [`WorkCommand`] that exhausted its
/// retries, plus the bookkeeping an operator needs to triage it.
#[derive(Debug, Clone)]
pub struct FailedWork {
    /// Unique identifier for this entry.
    pub id: i64,
    /// The work command on its final, failed attempt.
    pub original_work: WorkCommand,
    /// The error from the final attempt.
    pub final_error: String,
    /// When the dead letter was recorded.
    pub failed_at: DateTime<Utc>,
    /// The worker instance/identity that reported the final failure.
    pub agent: String,
    /// Current triage status.
    pub status: FailedWorkStatus,
    /// When the entry was resolved or discarded, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who/what resolved or discarded it.
    pub resolved_by: Option<String>,
    /// Free-form resolution notes.
    pub resolution_notes: Option<String>,
}

/// Postgres-backed dead-letter queue over the `failed_work` table.
pub struct FailedWorkQueue {
    pool: PgPool,
}

impl FailedWorkQueue {
    /// Create a queue over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a dead letter.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the insert fails.
    pub async fn add_entry(&self, dead_letter: &DeadLetter) -> Result<i64, FailedWorkError> {
        let work = &dead_letter.original_work;
        let row = sqlx::query(
            "INSERT INTO failed_work (
                subject_id, work_type, correlation_id, triggered_by_event_id,
                attempt, max_attempts, created_at, last_error, payload,
                final_error, failed_at, agent, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending')
            RETURNING id",
        )
        .bind(work.subject_id.as_str())
        .bind(serde_json::to_value(work.work_type).map_err(|e| FailedWorkError::Database(e.to_string()))?)
        .bind(work.correlation_id)
        .bind(work.triggered_by_event_id)
        .bind(work.attempt as i32)
        .bind(work.max_attempts as i32)
        .bind(work.created_at)
        .bind(&work.last_error)
        .bind(&work.payload)
        .bind(&dead_letter.final_error)
        .bind(dead_letter.failed_at)
        .bind(&dead_letter.agent)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FailedWorkError::Database(e.to_string()))?;

        let id: i64 = row.get("id");

        tracing::warn!(
            failed_work_id = id,
            subject_id = %work.subject_id,
            error = %dead_letter.final_error,
            attempt = work.attempt,
            "work command dead-lettered"
        );
        metrics::counter!("dlq_entries_added_total").increment(1);

        Ok(id)
    }

    /// List pending dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedWork>, FailedWorkError> {
        self.list_by_status(FailedWorkStatus::Pending, limit).await
    }

    /// List dead letters with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: FailedWorkStatus,
        limit: usize,
    ) -> Result<Vec<FailedWork>, FailedWorkError> {
        #[allow(clippy::cast_possible_wrap)]
        let limit = limit as i64;
        let rows = sqlx::query(
            "SELECT id, subject_id, work_type, correlation_id, triggered_by_event_id,
                    attempt, max_attempts, created_at, last_error, payload,
                    final_error, failed_at, agent, status,
                    resolved_at, resolved_by, resolution_notes
             FROM failed_work
             WHERE status = $1
             ORDER BY failed_at ASC
             LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FailedWorkError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_work).collect()
    }

    /// Mark a dead letter resolved.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), FailedWorkError> {
        sqlx::query(
            "UPDATE failed_work
             SET status = 'resolved', resolved_at = now(), resolved_by = $1, resolution_notes = $2
             WHERE id = $3",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FailedWorkError::Database(e.to_string()))?;

        tracing::info!(failed_work_id = id, resolved_by, "failed work entry resolved");
        metrics::counter!("dlq_entries_resolved_total").increment(1);

        Ok(())
    }

    /// Mark a dead letter discarded.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), FailedWorkError> {
        sqlx::query(
            "UPDATE failed_work
             SET status = 'discarded', resolved_at = now(), resolution_notes = $1
             WHERE id = $2",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| FailedWorkError::Database(e.to_string()))?;

        tracing::warn!(failed_work_id = id, reason, "failed work entry discarded");
        metrics::counter!("dlq_entries_discarded_total").increment(1);

        Ok(())
    }

    /// Count pending dead letters.
    ///
    /// # Errors
    ///
    /// Returns [`FailedWorkError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, FailedWorkError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM failed_work WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| FailedWorkError::Database(e.to_string()))?;
        Ok(row.get("count"))
    }

    fn row_to_failed_work(row: &sqlx::postgres::PgRow) -> Result<FailedWork, FailedWorkError> {
        let work_type_json: serde_json::Value = row.get("work_type");
        let work_type =
            serde_json::from_value(work_type_json).map_err(|e| FailedWorkError::Database(e.to_string()))?;
        let subject_id_str: String = row.get("subject_id");
        let subject_id = subject_id_str
            .parse()
            .map_err(|_| FailedWorkError::Database(format!("invalid subject id: {subject_id_str}")))?;
        let status_str: String = row.get("status");
        let status = FailedWorkStatus::parse(&status_str)?;
        #[allow(clippy::cast_sign_loss)]
        let attempt: i32 = row.get("attempt");
        #[allow(clippy::cast_sign_loss)]
        let max_attempts: i32 = row.get("max_attempts");

        Ok(FailedWork {
            id: row.get("id"),
            original_work: WorkCommand {
                subject_id,
                work_type,
                correlation_id: row.get("correlation_id"),
                triggered_by_event_id: row.get("triggered_by_event_id"),
                attempt: attempt as u32,
                max_attempts: max_attempts as u32,
                created_at: row.get("created_at"),
                last_error: row.get("last_error"),
                payload: row.get("payload"),
            },
            final_error: row.get("final_error"),
            failed_at: row.get("failed_at"),
            agent: row.get("agent"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            FailedWorkStatus::Pending,
            FailedWorkStatus::Processing,
            FailedWorkStatus::Resolved,
            FailedWorkStatus::Discarded,
        ] {
            let s = status.as_str();
            let parsed = FailedWorkStatus::parse(s).unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn status_rejects_unknown_string() {
        assert!(FailedWorkStatus::parse("bogus").is_err());
    }
}
