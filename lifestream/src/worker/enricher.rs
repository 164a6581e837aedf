//! The enrich worker (spec §4.5): ask a model for tags and summaries, and
//! fold newly discovered tags into the shared catalog.
//!
//! The "soft list of known tags" the enricher biases toward is a
//! per-process in-memory set (spec §5: "read/written only by the
//! enricher's single task"), seeded once at startup from the `tags.catalog`
//! compacted topic and republished in full whenever a completion adds a
//! tag not already in it.

use chrono::Utc;
use futures::StreamExt;
use lifestream_core::domain::{DomainEvent, EnrichmentCompleted, WorkCommand, WorkType};
use lifestream_core::event::StoredEvent;
use lifestream_core::event_bus::{EventBus, EventBusError};
use lifestream_core::subject::{SubjectId, SubjectKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::StageWorker;

/// The compacted topic the tag catalog lives on (spec §5/§6): single
/// partition, single key, read/written only by the enricher's own task.
pub const TAGS_CATALOG_TOPIC: &str = "tags.catalog";

#[derive(Debug, Serialize, Deserialize)]
struct TagCatalogSnapshot {
    tags: Vec<String>,
}

/// Drain whatever history is already on `tags.catalog` and seed `catalog`
/// from the most recent snapshot, waiting up to `timeout` for the first
/// message and going idle once nothing new arrives within it.
///
/// # Errors
///
/// Returns [`EventBusError`] if the subscription itself cannot be made.
pub async fn seed_catalog_from_bus(
    bus: &dyn EventBus,
    catalog: &TagCatalog,
    consumer_group: &str,
    timeout: Duration,
) -> Result<(), EventBusError> {
    let mut stream = bus.subscribe(&[TAGS_CATALOG_TOPIC], consumer_group).await?;
    let mut latest: Option<Vec<String>> = None;
    while let Ok(Some(Ok((event, _partition, _offset)))) = tokio::time::timeout(timeout, stream.next()).await {
        if let Ok(snapshot) = serde_json::from_value::<TagCatalogSnapshot>(event.payload) {
            latest = Some(snapshot.tags);
        }
    }
    if let Some(tags) = latest {
        catalog.reseed(tags).await;
    }
    Ok(())
}

/// Republish the full catalog as the single record on `tags.catalog`'s
/// single key — a compacted topic, so this replaces whatever snapshot was
/// there before rather than appending to it.
async fn publish_catalog(bus: &dyn EventBus, tags: &[String]) -> Result<(), EventBusError> {
    let now = Utc::now();
    let envelope = StoredEvent {
        event_id: Uuid::new_v4(),
        occurred_at: now,
        received_at: now,
        source: "enricher".to_string(),
        subject_kind: SubjectKind::Link,
        subject_id: SubjectId::new(SubjectKind::Link, "tags-catalog"),
        event_type: "tags.catalog".to_string(),
        schema_version: 1,
        payload: serde_json::to_value(TagCatalogSnapshot { tags: tags.to_vec() })
            .unwrap_or(serde_json::Value::Null),
        correlation_id: Uuid::new_v4(),
        causation_id: None,
        forwarded: true,
    };
    bus.publish(TAGS_CATALOG_TOPIC, "tags-catalog", &envelope).await
}

#[derive(Debug, Deserialize)]
struct EnrichPayload {
    title: Option<String>,
    text_content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModelRequest<'a> {
    title: Option<&'a str>,
    body: &'a str,
    known_tags: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    tags: Vec<String>,
    summary_short: Option<String>,
    summary_long: Option<String>,
    language: Option<String>,
}

/// Known-tags catalog shared by one enricher process, seeded from
/// `tags.catalog` and capped softly at 100 entries (spec §4.5).
#[derive(Default)]
pub struct TagCatalog {
    tags: Mutex<BTreeSet<String>>,
}

impl TagCatalog {
    /// An empty catalog, for a process that has not yet replayed
    /// `tags.catalog`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the catalog from a full set read off the compacted topic.
    pub async fn reseed(&self, tags: impl IntoIterator<Item = String>) {
        *self.tags.lock().await = tags.into_iter().collect();
    }

    /// The current catalog, capped at 100 entries (most recently added
    /// last, so truncation drops the oldest).
    pub async fn known_tags(&self) -> Vec<String> {
        self.tags.lock().await.iter().take(100).cloned().collect()
    }

    /// Merge `new_tags` in, returning the full sorted set if anything
    /// changed (the caller republishes this to `tags.catalog`).
    pub async fn merge(&self, new_tags: &[String]) -> Option<Vec<String>> {
        let mut tags = self.tags.lock().await;
        let before = tags.len();
        for tag in new_tags {
            tags.insert(tag.clone());
        }
        if tags.len() == before {
            None
        } else {
            Some(tags.iter().cloned().collect())
        }
    }
}

/// Enriches a link's content by calling an external model, or falls back
/// to a local heuristic when no model endpoint is configured.
pub struct HttpEnricher {
    client: Client,
    model_api_url: Option<String>,
    model_api_key: Option<String>,
    char_budget: usize,
    catalog: Arc<TagCatalog>,
    bus: Option<Arc<dyn EventBus>>,
    agent_id: String,
}

impl HttpEnricher {
    /// Build an enricher. `model_api_url`/`model_api_key` unset means this
    /// process runs the local heuristic fallback instead of calling out.
    /// `bus` is used only to republish the tag catalog after it grows; pass
    /// `None` in tests that don't care about that side effect.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest::Error` if the client cannot be
    /// built.
    pub fn new(
        timeout: Duration,
        char_budget: usize,
        model_api_url: Option<String>,
        model_api_key: Option<String>,
        catalog: Arc<TagCatalog>,
        bus: Option<Arc<dyn EventBus>>,
        agent_id: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            model_api_url,
            model_api_key,
            char_budget,
            catalog,
            bus,
            agent_id: agent_id.into(),
        })
    }

    async fn enrich(&self, payload: &EnrichPayload) -> Result<EnrichmentCompleted, String> {
        let body = payload.text_content.as_deref().unwrap_or_default();
        let truncated: String = body.chars().take(self.char_budget).collect();
        let known_tags = self.catalog.known_tags().await;

        let response = match &self.model_api_url {
            Some(url) => self.call_model(url, payload.title.as_deref(), &truncated, &known_tags).await?,
            None => heuristic_enrichment(payload.title.as_deref(), &truncated),
        };

        if let Some(full_catalog) = self.catalog.merge(&response.tags).await {
            tracing::debug!(tag_count = full_catalog.len(), "tag catalog grew");
            if let Some(bus) = &self.bus {
                if let Err(e) = publish_catalog(bus.as_ref(), &full_catalog).await {
                    tracing::warn!(error = %e, "failed to republish tag catalog");
                }
            }
        }

        Ok(EnrichmentCompleted {
            tags: response.tags,
            summary_short: response.summary_short,
            summary_long: response.summary_long,
            language: response.language,
            model_version: self.model_api_url.as_ref().map(|_| "external".to_string()),
        })
    }

    async fn call_model(
        &self,
        url: &str,
        title: Option<&str>,
        body: &str,
        known_tags: &[String],
    ) -> Result<ModelResponse, String> {
        let mut request = self.client.post(url).json(&ModelRequest {
            title,
            body,
            known_tags,
        });
        if let Some(key) = &self.model_api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| format!("model request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("model returned status {}", response.status()));
        }
        response
            .json::<ModelResponse>()
            .await
            .map_err(|e| format!("model response was not well-formed: {e}"))
    }
}

/// A model-free fallback: title words as tags, truncated body as the short
/// summary. Used when `model_api_url` is unset so the pipeline still
/// produces publishable output in a development environment without a
/// configured model.
fn heuristic_enrichment(title: Option<&str>, body: &str) -> ModelResponse {
    let tags: Vec<String> = title
        .unwrap_or_default()
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .take(5)
        .map(|w| w.to_lowercase())
        .collect();
    let summary_short = body.chars().take(200).collect::<String>();
    ModelResponse {
        tags,
        summary_short: if summary_short.is_empty() { None } else { Some(summary_short) },
        summary_long: if body.is_empty() { None } else { Some(body.chars().take(2000).collect()) },
        language: None,
    }
}

impl StageWorker for HttpEnricher {
    fn work_type(&self) -> WorkType {
        WorkType::EnrichLink
    }

    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn handle<'a>(
        &'a self,
        command: &'a WorkCommand,
    ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>> {
        Box::pin(async move {
            let payload: EnrichPayload = serde_json::from_value(command.payload.clone())
                .map_err(|e| format!("malformed enrich payload: {e}"))?;
            let result = self.enrich(&payload).await?;
            Ok(DomainEvent::EnrichmentCompleted(result))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tag_catalog_merge_reports_growth() {
        let catalog = TagCatalog::new();
        let grown = catalog.merge(&["rust".to_string(), "async".to_string()]).await;
        assert!(grown.is_some());
        let unchanged = catalog.merge(&["rust".to_string()]).await;
        assert!(unchanged.is_none());
    }

    #[tokio::test]
    async fn known_tags_caps_at_one_hundred() {
        let catalog = TagCatalog::new();
        let many: Vec<String> = (0..150).map(|i| format!("tag{i}")).collect();
        catalog.merge(&many).await;
        assert_eq!(catalog.known_tags().await.len(), 100);
    }

    #[test]
    fn heuristic_fallback_derives_tags_from_title() {
        let result = heuristic_enrichment(Some("Rust Async Programming Guide"), "some body text");
        assert!(result.tags.contains(&"rust".to_string()) || result.tags.contains(&"async".to_string()));
    }
}
