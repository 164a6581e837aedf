//! `POST /links`: the single capture surface spec §6 describes — normalize
//! the submitted URL, derive its subject id, and append `link.added`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use lifestream_core::domain::{DomainEvent, LinkAdded};
use lifestream_core::event::NewEvent;
use lifestream_core::identity::subject_id_for_url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::AppState;

/// Request body for `POST /links`.
#[derive(Debug, Deserialize)]
pub struct CaptureLinkRequest {
    /// The raw URL as submitted by the capture client.
    pub url: String,
    /// Where this capture came from (e.g. `"chrome"`, `"phone"`). Defaults
    /// to `"api"` when omitted.
    #[serde(default)]
    pub source: Option<String>,
}

/// Response body for `POST /links`.
#[derive(Debug, Serialize)]
pub struct CaptureLinkResponse {
    /// Whether the link was accepted.
    pub success: bool,
    /// The subject id the normalized URL maps to.
    pub subject_id: String,
    /// The normalized URL.
    pub url_norm: String,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct CaptureLinkError {
    /// Human-readable error message.
    pub error: String,
}

/// Handle `POST /links`.
///
/// Normalization is deterministic and idempotent (spec §8 property 1): a
/// concurrent duplicate submission of the same URL derives the same
/// subject id and lands as a harmless second `link.added` for a subject
/// the materializer's `ON CONFLICT DO NOTHING` already has a row for.
///
/// `subject_id_for_url` itself never fails (malformed input normalizes to
/// itself); this handler still rejects a malformed URL with 400, since an
/// HTTP capture client almost certainly sent a typo rather than an
/// intentional non-URL subject.
pub async fn capture_link(
    State(state): State<AppState>,
    Json(request): Json<CaptureLinkRequest>,
) -> Result<Json<CaptureLinkResponse>, (StatusCode, Json<CaptureLinkError>)> {
    if let Err(e) = url::Url::parse(&request.url) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(CaptureLinkError {
                error: format!("invalid url: {e}"),
            }),
        ));
    }
    let (subject_id, url_norm) = subject_id_for_url(&request.url);

    let source = request.source.unwrap_or_else(|| state.source.to_string());
    let event = DomainEvent::LinkAdded(LinkAdded {
        url: request.url,
        url_norm: Some(url_norm.clone()),
    });
    let new_event = NewEvent::from_domain_event(
        subject_id.clone(),
        source,
        Utc::now(),
        Uuid::new_v4(),
        None,
        &event,
    );

    state.ledger.append(new_event).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CaptureLinkError {
                error: e.to_string(),
            }),
        )
    })?;

    Ok(Json(CaptureLinkResponse {
        success: true,
        subject_id: subject_id.as_str().to_string(),
        url_norm,
    }))
}
