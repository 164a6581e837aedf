//! Read-only queries against the projection tables [`lifestream_projections::handlers`]
//! writes, grounded on the teacher's `PostgresInventoryQuery`-style read
//! adapters: a query struct wraps a pool and exposes one method per question
//! a caller needs answered, rather than handing out raw SQL.
//!
//! The router uses these to decide whether a unit of work has already taken
//! effect (so a redelivered `work.*` message is a no-op rather than a
//! duplicate dispatch); the admin CLI uses them to find stuck or exhausted
//! links and to drive `set-visibility --all`.

use lifestream_core::subject::SubjectId;
use sqlx::PgPool;

/// Errors reading the projection tables.
#[derive(thiserror::Error, Debug)]
pub enum ProjectionQueryError {
    /// The underlying store rejected a query.
    #[error("projection query error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The publish-admission state of a link, as recorded by the materializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishState {
    /// True once enrichment has produced a version publish hasn't caught up to.
    pub dirty: bool,
    /// The enrichment version publish should be reflecting.
    pub desired_version: i64,
    /// The enrichment version publish last reflected.
    pub published_version: i64,
}

/// Read-only access to the link projection tables.
pub struct ProjectionQueries {
    pool: PgPool,
}

impl ProjectionQueries {
    /// Wrap a pool for read-only projection queries.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// True if `link_content` already has a row for this subject (the
    /// fetch work for it has already taken effect).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn has_content(&self, subject_id: &SubjectId) -> Result<bool, ProjectionQueryError> {
        let row = sqlx::query("SELECT 1 AS found FROM link_content WHERE subject_id = $1")
            .bind(subject_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// True if `link_metadata` already carries a non-empty tag set for this
    /// subject (the enrich work for it has already taken effect).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn has_enrichment(
        &self,
        subject_id: &SubjectId,
    ) -> Result<bool, ProjectionQueryError> {
        let row = sqlx::query(
            "SELECT 1 AS found FROM link_metadata
             WHERE subject_id = $1 AND array_length(tags, 1) > 0",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// The publish admission state for a subject, if it has been enriched
    /// at least once.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn publish_state(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<PublishState>, ProjectionQueryError> {
        let row = sqlx::query_as::<_, (bool, i64, i64)>(
            "SELECT dirty, desired_version, published_version
             FROM publish_state WHERE subject_id = $1",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(dirty, desired_version, published_version)| PublishState {
            dirty,
            desired_version,
            published_version,
        }))
    }

    /// Subject ids that are enriched but whose publish state never caught
    /// up (admin "recover stuck": `status = 'enriched' AND dirty = true`).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn stuck_subject_ids(
        &self,
        subject_id: Option<&SubjectId>,
    ) -> Result<Vec<String>, ProjectionQueryError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT ls.subject_id FROM link_state ls
             JOIN publish_state ps ON ps.subject_id = ls.subject_id
             WHERE ls.status = 'enriched' AND ps.dirty = true
               AND ($1::text IS NULL OR ls.subject_id = $1)
             ORDER BY ls.subject_id",
        )
        .bind(subject_id.map(SubjectId::as_str))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Subject ids matching an optional status filter, for
    /// `set-visibility --all`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn subject_ids_by_status(
        &self,
        status: Option<&str>,
    ) -> Result<Vec<String>, ProjectionQueryError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT subject_id FROM link_state
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY subject_id",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// The original capture facts for a link, for `retry-failed` to
    /// re-emit `link.added` with.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn link_capture(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<LinkCapture>, ProjectionQueryError> {
        let row = sqlx::query_as::<_, (String, Option<String>, String)>(
            "SELECT url, url_norm, source FROM link_state WHERE subject_id = $1",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(url, url_norm, source)| LinkCapture { url, url_norm, source }))
    }

    /// The currently projected enrichment for a link, for `recover-stuck`
    /// to re-emit a synthetic `enrichment.completed` from.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionQueryError::Database`] if the query fails.
    pub async fn link_enrichment(
        &self,
        subject_id: &SubjectId,
    ) -> Result<Option<LinkEnrichment>, ProjectionQueryError> {
        let row = sqlx::query_as::<_, (Vec<String>, Option<String>, Option<String>, Option<String>, Option<String>)>(
            "SELECT tags, summary_short, summary_long, language, model_version
             FROM link_metadata WHERE subject_id = $1",
        )
        .bind(subject_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(tags, summary_short, summary_long, language, model_version)| LinkEnrichment {
            tags,
            summary_short,
            summary_long,
            language,
            model_version,
        }))
    }
}

/// A link's original capture facts, as currently projected.
#[derive(Debug, Clone)]
pub struct LinkCapture {
    /// The originally captured URL.
    pub url: String,
    /// Its normalized form, if one was computed.
    pub url_norm: Option<String>,
    /// The source that originally captured it.
    pub source: String,
}

/// A link's currently projected enrichment, for re-emission.
#[derive(Debug, Clone)]
pub struct LinkEnrichment {
    /// Discovered tags.
    pub tags: Vec<String>,
    /// Short summary.
    pub summary_short: Option<String>,
    /// Long summary.
    pub summary_long: Option<String>,
    /// Detected language.
    pub language: Option<String>,
    /// Enriching model version.
    pub model_version: Option<String>,
}
