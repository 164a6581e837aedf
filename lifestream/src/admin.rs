//! Administrative operations (spec §4.7): every effect is an appended
//! event, never a direct projection write — with one narrow exception.
//! `retry-failed` must clear the `link_content`/`link_metadata` rows a
//! prior fetch/enrich already wrote before re-emitting `link.added`,
//! otherwise the router's idempotency checks (`has_content`,
//! `has_enrichment`) would see the old work as already done and skip
//! re-dispatching it. That clear is a direct write against tables that
//! exist purely to cache worker output, not against the ledger itself.
//!
//! `reset-bus` clears the database-owned bookkeeping (`idempotency_ledger`,
//! `consumer_progress`, `events.forwarded`) in one transaction. Deleting and
//! recreating the underlying bus topics is an infrastructure operation left
//! to the operator's `rpk`/broker tooling; this core has no topic-admin
//! surface (see `DESIGN.md`).

use chrono::Utc;
use lifestream_core::domain::{DomainEvent, EnrichmentCompleted, LinkAdded, LinkVisibilityChanged, Visibility};
use lifestream_core::event::NewEvent;
use lifestream_core::ledger::{EventLedger, EventLedgerError};
use lifestream_core::subject::SubjectId;
use lifestream_postgres::FailedWorkQueue;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::projection_queries::{ProjectionQueries, ProjectionQueryError};

/// Errors from an admin operation.
#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    /// The ledger rejected an append.
    #[error(transparent)]
    Ledger(#[from] EventLedgerError),
    /// A projection query failed.
    #[error(transparent)]
    Query(#[from] ProjectionQueryError),
    /// The underlying database rejected an operation.
    #[error("admin database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The requested subject does not exist in the projections.
    #[error("subject {0} not found")]
    SubjectNotFound(String),
}

/// A subject that would be or was affected by an admin operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedSubject {
    /// The subject id.
    pub subject_id: String,
    /// What would happen / happened to it.
    pub action: String,
}

/// The result of running an admin operation: the subjects touched, and
/// whether this was a dry run (no events were actually appended).
#[derive(Debug, Clone)]
pub struct OperationReport {
    /// Subjects the operation affected (or would affect, in a dry run).
    pub affected: Vec<AffectedSubject>,
    /// True if no writes were actually made.
    pub dry_run: bool,
}

/// Administrative operations over the ledger and projection tables.
pub struct AdminOperations {
    pool: PgPool,
    ledger: Arc<dyn EventLedger>,
    queries: ProjectionQueries,
    dlq: FailedWorkQueue,
}

impl AdminOperations {
    /// Build admin operations over a shared pool and ledger.
    #[must_use]
    pub fn new(pool: PgPool, ledger: Arc<dyn EventLedger>) -> Self {
        let queries = ProjectionQueries::new(pool.clone());
        let dlq = FailedWorkQueue::new(pool.clone());
        Self { pool, ledger, queries, dlq }
    }

    /// `set-visibility`: emit `link.visibility_changed` for one subject or
    /// every subject matching `status`.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Query`] if resolving `--all` subjects fails,
    /// or [`AdminError::Ledger`] if an append fails.
    pub async fn set_visibility(
        &self,
        subject_id: Option<&str>,
        all: bool,
        status: Option<&str>,
        visibility: Visibility,
        dry_run: bool,
    ) -> Result<OperationReport, AdminError> {
        let subject_ids = self.resolve_targets(subject_id, all, status).await?;
        let mut affected = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            affected.push(AffectedSubject {
                subject_id: subject_id.clone(),
                action: format!("visibility -> {}", visibility_label(visibility)),
            });
            if !dry_run {
                let event = DomainEvent::LinkVisibilityChanged(LinkVisibilityChanged { visibility });
                self.append(&subject_id, event).await?;
            }
        }
        Ok(OperationReport { affected, dry_run })
    }

    /// `retry-failed`: clear cached fetch/enrich output and re-emit
    /// `link.added` for subjects with pending dead letters, then mark
    /// those dead letters resolved.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Database`] if listing or clearing fails, or
    /// [`AdminError::Ledger`] if re-emitting `link.added` fails.
    pub async fn retry_failed(
        &self,
        subject_id: Option<&str>,
        limit: usize,
        dry_run: bool,
    ) -> Result<OperationReport, AdminError> {
        let pending = self.dlq.list_pending(limit.max(1)).await.map_err(to_database_error)?;
        let mut affected = Vec::new();
        for entry in pending {
            let entry_subject = entry.original_work.subject_id.as_str().to_string();
            if let Some(only) = subject_id {
                if entry_subject != only {
                    continue;
                }
            }
            if affected.len() >= limit {
                break;
            }

            let Some(capture) = self.queries.link_capture(&entry.original_work.subject_id).await? else {
                continue;
            };
            affected.push(AffectedSubject {
                subject_id: entry_subject.clone(),
                action: "clear cached content/enrichment, re-emit link.added".to_string(),
            });

            if dry_run {
                continue;
            }

            self.clear_cached_work(&entry_subject).await?;
            let event = DomainEvent::LinkAdded(LinkAdded {
                url: capture.url,
                url_norm: capture.url_norm,
            });
            self.append(&entry_subject, event).await?;
            self.dlq
                .mark_resolved(entry.id, "admin:retry-failed", Some("retried by operator"))
                .await
                .map_err(to_database_error)?;
        }
        Ok(OperationReport { affected, dry_run })
    }

    /// `recover-stuck`: re-emit a synthetic `enrichment.completed` from
    /// currently projected metadata for links stuck `enriched` + dirty.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Query`] if finding stuck subjects fails, or
    /// [`AdminError::Ledger`] if an append fails.
    pub async fn recover_stuck(
        &self,
        subject_id: Option<&str>,
        all: bool,
        dry_run: bool,
    ) -> Result<OperationReport, AdminError> {
        let parsed = subject_id.map(str::parse::<SubjectId>).transpose().ok().flatten();
        let targets = if all || subject_id.is_some() {
            self.queries.stuck_subject_ids(parsed.as_ref()).await?
        } else {
            Vec::new()
        };

        let mut affected = Vec::with_capacity(targets.len());
        for subject_id in targets {
            let Ok(parsed) = subject_id.parse::<SubjectId>() else {
                continue;
            };
            let Some(enrichment) = self.queries.link_enrichment(&parsed).await? else {
                continue;
            };
            affected.push(AffectedSubject {
                subject_id: subject_id.clone(),
                action: "re-emit enrichment.completed".to_string(),
            });
            if dry_run {
                continue;
            }
            let event = DomainEvent::EnrichmentCompleted(EnrichmentCompleted {
                tags: enrichment.tags,
                summary_short: enrichment.summary_short,
                summary_long: enrichment.summary_long,
                language: enrichment.language,
                model_version: enrichment.model_version,
            });
            self.append(&subject_id, event).await?;
        }
        Ok(OperationReport { affected, dry_run })
    }

    /// `reset-bus`: clear the idempotency ledger, consumer progress, and
    /// the `forwarded` flag on every event, forcing a full replay.
    ///
    /// This only touches Postgres bookkeeping, not the broker: with
    /// `consumer_progress` empty, the materializer's next boot finds no
    /// recorded offset for any partition (spec §4.6's startup offset
    /// reconciliation resolves that to `desired = 0`), so it seeks to
    /// each partition's earliest retained offset and reprojects
    /// everything the broker still has. Clearing the broker's own
    /// retained history, if a genuinely from-zero replay is needed after
    /// retention has expired some of it, is outside this operation's
    /// scope.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Database`] if the reset transaction fails.
    pub async fn reset_bus(&self, dry_run: bool) -> Result<OperationReport, AdminError> {
        if dry_run {
            return Ok(OperationReport {
                affected: vec![AffectedSubject {
                    subject_id: "*".to_string(),
                    action: "clear idempotency_ledger, consumer_progress, events.forwarded".to_string(),
                }],
                dry_run: true,
            });
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM idempotency_ledger").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM consumer_progress").execute(&mut *tx).await?;
        sqlx::query("UPDATE events SET forwarded = false").execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(OperationReport {
            affected: vec![AffectedSubject {
                subject_id: "*".to_string(),
                action: "cleared idempotency_ledger, consumer_progress, events.forwarded".to_string(),
            }],
            dry_run: false,
        })
    }

    async fn resolve_targets(
        &self,
        subject_id: Option<&str>,
        all: bool,
        status: Option<&str>,
    ) -> Result<Vec<String>, AdminError> {
        if let Some(id) = subject_id {
            return Ok(vec![id.to_string()]);
        }
        if all {
            return Ok(self.queries.subject_ids_by_status(status).await?);
        }
        Ok(Vec::new())
    }

    async fn clear_cached_work(&self, subject_id: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM link_metadata WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM link_content WHERE subject_id = $1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    async fn append(&self, subject_id: &str, event: DomainEvent) -> Result<(), AdminError> {
        let subject_id: SubjectId = subject_id
            .parse()
            .map_err(|_| AdminError::SubjectNotFound(subject_id.to_string()))?;
        let new_event = NewEvent::from_domain_event(subject_id, "admin:cli", Utc::now(), Uuid::new_v4(), None, &event);
        self.ledger.append(new_event).await?;
        Ok(())
    }
}

fn visibility_label(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public",
        Visibility::Private => "private",
    }
}

fn to_database_error(e: lifestream_postgres::FailedWorkError) -> AdminError {
    AdminError::Database(sqlx::Error::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_label_matches_cli_vocabulary() {
        assert_eq!(visibility_label(Visibility::Public), "public");
        assert_eq!(visibility_label(Visibility::Private), "private");
    }

    #[test]
    fn dry_run_report_carries_no_writes_marker() {
        let report = OperationReport {
            affected: vec![AffectedSubject {
                subject_id: "link:abc".to_string(),
                action: "visibility -> private".to_string(),
            }],
            dry_run: true,
        };
        assert!(report.dry_run);
        assert_eq!(report.affected.len(), 1);
    }
}
