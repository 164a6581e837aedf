//! Postgres-backed [`EventLedger`] (spec §4.2): the pipeline's durable,
//! append-only source of truth.
//!
//! Grounded on the raw-SQL/tracing/metrics style of
//! `dead_letter_queue.rs`'s `DeadLetterQueue`: dynamic `sqlx::query`/
//! `query_as` against a pool (not the compile-time-checked `query!` macros,
//! which need a live database at build time), with a `tracing` line and a
//! `metrics` counter bump alongside every write.

use chrono::{DateTime, Utc};
use lifestream_core::{
    EventLedger, EventLedgerError, NewEvent, StoredEvent, SubjectId, SubjectKind,
};
use sqlx::{FromRow, PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use uuid::Uuid;

/// The durable event ledger, backed by the `events` table.
#[derive(Debug, Clone)]
pub struct PostgresEventLedger {
    pool: PgPool,
}

impl PostgresEventLedger {
    /// Wrap an existing connection pool. The caller is responsible for
    /// running migrations beforehand.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool, for callers that need to share it with
    /// other Postgres-backed ports in the same transaction.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct EventRow {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
    source: String,
    subject_kind: String,
    subject_id: String,
    event_type: String,
    schema_version: i32,
    payload: serde_json::Value,
    correlation_id: Uuid,
    causation_id: Option<Uuid>,
    forwarded: bool,
}

impl FromRow<'_, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            occurred_at: row.try_get("occurred_at")?,
            received_at: row.try_get("received_at")?,
            source: row.try_get("source")?,
            subject_kind: row.try_get("subject_kind")?,
            subject_id: row.try_get("subject_id")?,
            event_type: row.try_get("event_type")?,
            schema_version: row.try_get("schema_version")?,
            payload: row.try_get("payload")?,
            correlation_id: row.try_get("correlation_id")?,
            causation_id: row.try_get("causation_id")?,
            forwarded: row.try_get("forwarded")?,
        })
    }
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = EventLedgerError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let subject_kind = SubjectKind::from_str(&row.subject_kind)
            .map_err(|e| EventLedgerError::Serialization(e.to_string()))?;
        let subject_id = SubjectId::from_str(&row.subject_id)
            .map_err(|e| EventLedgerError::Serialization(e.to_string()))?;
        Ok(Self {
            event_id: row.event_id,
            occurred_at: row.occurred_at,
            received_at: row.received_at,
            source: row.source,
            subject_kind,
            subject_id,
            event_type: row.event_type,
            #[allow(clippy::cast_sign_loss)]
            schema_version: row.schema_version as u32,
            payload: row.payload,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            forwarded: row.forwarded,
        })
    }
}

const SELECT_COLUMNS: &str = "event_id, occurred_at, received_at, source, subject_kind, \
     subject_id, event_type, schema_version, payload, correlation_id, causation_id, forwarded";

impl EventLedger for PostgresEventLedger {
    fn append(
        &self,
        event: NewEvent,
    ) -> Pin<Box<dyn Future<Output = Result<StoredEvent, EventLedgerError>> + Send + '_>> {
        Box::pin(async move {
            let event_id = Uuid::new_v4();
            #[allow(clippy::cast_possible_wrap)]
            let schema_version = event.schema_version as i32;

            let query = format!(
                "INSERT INTO events (
                    event_id, occurred_at, received_at, source, subject_kind,
                    subject_id, event_type, schema_version, payload,
                    correlation_id, causation_id, forwarded
                )
                VALUES ($1, $2, now(), $3, $4, $5, $6, $7, $8, $9, $10, false)
                RETURNING {SELECT_COLUMNS}"
            );

            let row: EventRow = sqlx::query_as(&query)
                .bind(event_id)
                .bind(event.occurred_at)
                .bind(&event.source)
                .bind(event.subject_id.kind().to_string())
                .bind(event.subject_id.as_str())
                .bind(&event.event_type)
                .bind(schema_version)
                .bind(&event.payload)
                .bind(event.correlation_id)
                .bind(event.causation_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| EventLedgerError::Database(e.to_string()))?;

            metrics::counter!("ledger_events_appended_total").increment(1);
            tracing::debug!(
                event_id = %event_id,
                event_type = %row.event_type,
                subject_id = %row.subject_id,
                "appended event to ledger"
            );

            row.try_into()
        })
    }

    fn read_unforwarded(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventLedgerError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)]
            let limit = limit as i64;

            let query = format!(
                "SELECT {SELECT_COLUMNS} FROM events
                 WHERE forwarded = false
                 ORDER BY received_at ASC, event_id ASC
                 LIMIT $1"
            );

            let rows: Vec<EventRow> = sqlx::query_as(&query)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EventLedgerError::Database(e.to_string()))?;

            rows.into_iter().map(TryInto::try_into).collect()
        })
    }

    fn mark_forwarded(
        &self,
        event_ids: &[Uuid],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLedgerError>> + Send + '_>> {
        let event_ids = event_ids.to_vec();
        Box::pin(async move {
            if event_ids.is_empty() {
                return Ok(());
            }
            sqlx::query("UPDATE events SET forwarded = true WHERE event_id = ANY($1)")
                .bind(&event_ids)
                .execute(&self.pool)
                .await
                .map_err(|e| EventLedgerError::Database(e.to_string()))?;

            metrics::counter!("outbox_events_forwarded_total").increment(event_ids.len() as u64);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_row_rejects_unknown_subject_kind() {
        let row = EventRow {
            event_id: Uuid::nil(),
            occurred_at: Utc::now(),
            received_at: Utc::now(),
            source: "chrome".to_string(),
            subject_kind: "bogus".to_string(),
            subject_id: "link:abc".to_string(),
            event_type: "link.added".to_string(),
            schema_version: 1,
            payload: serde_json::json!({}),
            correlation_id: Uuid::nil(),
            causation_id: None,
            forwarded: false,
        };
        let result: Result<StoredEvent, _> = row.try_into();
        assert!(result.is_err());
    }
}
