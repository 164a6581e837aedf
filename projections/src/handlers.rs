//! Idempotent projection writes, one function per event type (spec §4.6
//! handler table). Each handler receives the decoded event and the
//! transaction the materializer is already holding open for this message,
//! so a projection write, the idempotency insert, and the progress update
//! all commit or roll back together.

use lifestream_core::domain::{
    AnnotationAdded, ContentFetched, EnrichmentCompleted, LinkAdded, LinkVisibilityChanged,
    PublishCompleted, TempReadingRecorded, TodoCompleted, TodoCreated, Visibility,
};
use lifestream_core::event::StoredEvent;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Errors applying a decoded event to the projection tables.
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// The underlying store rejected a write.
    #[error("projection database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn visibility_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Public => "public",
        Visibility::Private => "private",
    }
}

/// `link.added`: upsert the subject and link row with `status=new`. Never
/// downgrades an already-advanced status (the `DO NOTHING` on conflict is
/// deliberate — a replayed `link.added` must not reset progress).
pub async fn apply_link_added(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &LinkAdded,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();
    let url_norm = payload.url_norm.as_deref().unwrap_or(&payload.url);

    sqlx::query(
        "INSERT INTO subjects (subject_id, kind, visibility)
         VALUES ($1, 'link', 'public')
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(subject_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO link_state (subject_id, url, url_norm, source, status, visibility, pinned)
         VALUES ($1, $2, $3, $4, 'new', 'public', false)
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(subject_id)
    .bind(&payload.url)
    .bind(url_norm)
    .bind(&event.source)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// `content.fetched`: upsert link content. A `fetch_error` moves status to
/// `error` and bumps `retry_count`; otherwise a link in `new` advances to
/// `fetched`. Status is never moved backward.
pub async fn apply_content_fetched(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &ContentFetched,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();

    sqlx::query(
        "INSERT INTO link_content (subject_id, final_url, title, text_content, html_storage_key, fetch_error, fetched_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (subject_id) DO UPDATE SET
             final_url = EXCLUDED.final_url,
             title = EXCLUDED.title,
             text_content = EXCLUDED.text_content,
             html_storage_key = EXCLUDED.html_storage_key,
             fetch_error = EXCLUDED.fetch_error,
             fetched_at = EXCLUDED.fetched_at",
    )
    .bind(subject_id)
    .bind(&payload.final_url)
    .bind(&payload.title)
    .bind(&payload.text_content)
    .bind(&payload.html_storage_key)
    .bind(&payload.fetch_error)
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;

    if let Some(fetch_error) = &payload.fetch_error {
        sqlx::query(
            "UPDATE link_state
             SET status = 'error', retry_count = retry_count + 1,
                 last_error_at = $2, last_error = $3
             WHERE subject_id = $1",
        )
        .bind(subject_id)
        .bind(event.occurred_at)
        .bind(fetch_error)
        .execute(&mut **tx)
        .await?;
    } else {
        sqlx::query(
            "UPDATE link_state SET status = 'fetched', last_error = NULL
             WHERE subject_id = $1 AND status = 'new'",
        )
        .bind(subject_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// `enrichment.completed`: upsert tags/summaries (never overwriting a
/// non-empty tag set with an empty one), promote `new`/`fetched` to
/// `enriched`, and mark the publish state dirty.
pub async fn apply_enrichment_completed(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &EnrichmentCompleted,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();

    sqlx::query(
        "INSERT INTO link_metadata (subject_id, tags, summary_short, summary_long, language, model_version)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (subject_id) DO UPDATE SET
             tags = CASE
                 WHEN array_length(EXCLUDED.tags, 1) > 0 THEN EXCLUDED.tags
                 ELSE link_metadata.tags
             END,
             summary_short = COALESCE(EXCLUDED.summary_short, link_metadata.summary_short),
             summary_long = COALESCE(EXCLUDED.summary_long, link_metadata.summary_long),
             language = COALESCE(EXCLUDED.language, link_metadata.language),
             model_version = COALESCE(EXCLUDED.model_version, link_metadata.model_version),
             updated_at = now()",
    )
    .bind(subject_id)
    .bind(&payload.tags)
    .bind(&payload.summary_short)
    .bind(&payload.summary_long)
    .bind(&payload.language)
    .bind(&payload.model_version)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "UPDATE link_state SET status = 'enriched'
         WHERE subject_id = $1 AND status IN ('new', 'fetched')",
    )
    .bind(subject_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO publish_state (subject_id, desired_version, published_version, dirty)
         VALUES ($1, 1, 0, true)
         ON CONFLICT (subject_id) DO UPDATE SET
             desired_version = publish_state.desired_version + 1,
             dirty = true",
    )
    .bind(subject_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// `publish.completed`: reconcile `published_version` with `desired_version`
/// and move the link to its terminal `published` status.
pub async fn apply_publish_completed(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &PublishCompleted,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();
    let published_at = payload.published_at.unwrap_or(event.occurred_at);

    sqlx::query(
        "UPDATE publish_state
         SET published_version = desired_version, dirty = false, last_published_at = $2
         WHERE subject_id = $1",
    )
    .bind(subject_id)
    .bind(published_at)
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE link_state SET status = 'published' WHERE subject_id = $1")
        .bind(subject_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// `link.visibility_changed`: propagate to both the link row and the
/// subject registry.
pub async fn apply_link_visibility_changed(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &LinkVisibilityChanged,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();
    let visibility = visibility_str(payload.visibility);

    sqlx::query("UPDATE link_state SET visibility = $2 WHERE subject_id = $1")
        .bind(subject_id)
        .bind(visibility)
        .execute(&mut **tx)
        .await?;

    sqlx::query("UPDATE subjects SET visibility = $2, updated_at = now() WHERE subject_id = $1")
        .bind(subject_id)
        .bind(visibility)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// `temp.reading_recorded`: append to the time series and upsert "latest"
/// only if the incoming reading is strictly newer.
pub async fn apply_temp_reading_recorded(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &TempReadingRecorded,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();

    sqlx::query(
        "INSERT INTO subjects (subject_id, kind) VALUES ($1, 'sensor')
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(subject_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO sensor_readings (subject_id, occurred_at, celsius, humidity, battery)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (subject_id, occurred_at) DO NOTHING",
    )
    .bind(subject_id)
    .bind(event.occurred_at)
    .bind(payload.celsius)
    .bind(payload.humidity)
    .bind(payload.battery)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO sensor_latest (subject_id, occurred_at, celsius, humidity, battery)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (subject_id) DO UPDATE SET
             occurred_at = EXCLUDED.occurred_at,
             celsius = EXCLUDED.celsius,
             humidity = EXCLUDED.humidity,
             battery = EXCLUDED.battery
         WHERE sensor_latest.occurred_at < EXCLUDED.occurred_at",
    )
    .bind(subject_id)
    .bind(event.occurred_at)
    .bind(payload.celsius)
    .bind(payload.humidity)
    .bind(payload.battery)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// `todo.created`: upsert the todo row in its initial `open` state.
pub async fn apply_todo_created(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &TodoCreated,
) -> Result<(), HandlerError> {
    let subject_id = event.subject_id.as_str();

    sqlx::query(
        "INSERT INTO subjects (subject_id, kind) VALUES ($1, 'todo')
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(subject_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO todos (subject_id, title, project, labels, due_at, status)
         VALUES ($1, $2, $3, $4, $5, 'open')
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(subject_id)
    .bind(&payload.title)
    .bind(&payload.project)
    .bind(&payload.labels)
    .bind(payload.due_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// `todo.completed`: mark the todo done.
pub async fn apply_todo_completed(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    _payload: &TodoCompleted,
) -> Result<(), HandlerError> {
    sqlx::query(
        "UPDATE todos SET status = 'done', completed_at = $2 WHERE subject_id = $1",
    )
    .bind(event.subject_id.as_str())
    .bind(event.occurred_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// `annotation.added`: insert the annotation, attached to its link subject.
pub async fn apply_annotation_added(
    tx: &mut Transaction<'_, Postgres>,
    event: &StoredEvent,
    payload: &AnnotationAdded,
) -> Result<(), HandlerError> {
    let visibility = payload.visibility.map(visibility_str);

    sqlx::query(
        "INSERT INTO subjects (subject_id, kind) VALUES ($1, 'annotation')
         ON CONFLICT (subject_id) DO NOTHING",
    )
    .bind(event.subject_id.as_str())
    .execute(&mut **tx)
    .await?;

    insert_annotation(
        tx,
        payload.annotation_id,
        payload.link_subject_id.as_str(),
        payload.quote.as_deref(),
        payload.note.as_deref(),
        payload.selector.as_deref(),
        visibility,
    )
    .await
}

async fn insert_annotation(
    tx: &mut Transaction<'_, Postgres>,
    annotation_id: Uuid,
    link_subject_id: &str,
    quote: Option<&str>,
    note: Option<&str>,
    selector: Option<&str>,
    visibility: Option<&str>,
) -> Result<(), HandlerError> {
    sqlx::query(
        "INSERT INTO annotations (annotation_id, link_subject_id, quote, note, selector, visibility)
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'public'))
         ON CONFLICT (annotation_id) DO NOTHING",
    )
    .bind(annotation_id)
    .bind(link_subject_id)
    .bind(quote)
    .bind(note)
    .bind(selector)
    .bind(visibility)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
