//! The fetch worker (spec §4.5): resolve a URL, extract a title and
//! readable body text, and record what came back.
//!
//! Extraction here is deliberately simple — a `<title>` scan and a crude
//! tag-stripping pass over the body — since spec.md scopes "the HTML
//! readability extraction" out of this core's concerns; it specifies only
//! the work contract and the resulting event payload, not how good the
//! extraction needs to be.

use lifestream_core::domain::{ContentFetched, DomainEvent, WorkCommand, WorkType};
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::rate_limiter::HostnameRateLimiter;
use super::StageWorker;

#[derive(Debug, Deserialize)]
struct FetchPayload {
    url: String,
}

/// Fetches a link's content over HTTP.
pub struct HttpFetcher {
    client: Client,
    rate_limiter: HostnameRateLimiter,
    agent_id: String,
}

impl HttpFetcher {
    /// Build a fetcher with the given per-request timeout and per-hostname
    /// minimum request interval.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest::Error` if the client cannot be
    /// built.
    pub fn new(
        timeout: Duration,
        rate_limit_interval: Duration,
        agent_id: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            rate_limiter: HostnameRateLimiter::new(rate_limit_interval),
            agent_id: agent_id.into(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<ContentFetched, String> {
        let parsed = url::Url::parse(url).map_err(|e| format!("invalid url: {e}"))?;
        let hostname = parsed.host_str().unwrap_or_default().to_string();
        self.rate_limiter.acquire(&hostname).await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("transport error: {e}"))?;

        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        let body = response.text().await.map_err(|e| format!("transport error: {e}"))?;
        let title = extract_title(&body);
        let text_content = extract_text(&body);

        if text_content.trim().is_empty() {
            return Ok(ContentFetched {
                final_url,
                title,
                text_content: None,
                html_storage_key: None,
                fetch_error: Some("no extractable body text".to_string()),
            });
        }

        Ok(ContentFetched {
            final_url,
            title,
            text_content: Some(text_content),
            html_storage_key: None,
            fetch_error: None,
        })
    }
}

impl StageWorker for HttpFetcher {
    fn work_type(&self) -> WorkType {
        WorkType::FetchLink
    }

    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn handle<'a>(
        &'a self,
        command: &'a WorkCommand,
    ) -> Pin<Box<dyn Future<Output = Result<DomainEvent, String>> + Send + 'a>> {
        Box::pin(async move {
            let payload: FetchPayload = serde_json::from_value(command.payload.clone())
                .map_err(|e| format!("malformed fetch payload: {e}"))?;
            let content = self.fetch(&payload.url).await?;
            Ok(DomainEvent::ContentFetched(content))
        })
    }
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    if title.is_empty() {
        None
    } else {
        Some(html_unescape(title))
    }
}

/// Strip tags, scripts, and styles, collapsing remaining whitespace.
fn extract_text(html: &str) -> String {
    let without_scripts = strip_blocks(html, "<script", "</script>");
    let without_styles = strip_blocks(&without_scripts, "<style", "</style>");
    collapse_whitespace(&strip_remaining_tags(&without_styles))
}

/// Remove every `open..close` span, case-insensitively, without copying the
/// span's contents into the result.
fn strip_blocks(html: &str, open: &str, close: &str) -> String {
    let lower = html.to_lowercase();
    let mut result = String::with_capacity(html.len());
    let mut cursor = 0usize;
    loop {
        let Some(rel_start) = lower[cursor..].find(open) else {
            result.push_str(&html[cursor..]);
            break;
        };
        let start = cursor + rel_start;
        result.push_str(&html[cursor..start]);
        let Some(rel_close) = lower[start..].find(close) else {
            break;
        };
        cursor = start + rel_close + close.len();
    }
    result
}

fn strip_remaining_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_from_head() {
        let html = "<html><head><title>Example Page</title></head><body>hi</body></html>";
        assert_eq!(extract_title(html), Some("Example Page".to_string()));
    }

    #[test]
    fn missing_title_returns_none() {
        let html = "<html><body>hi</body></html>";
        assert_eq!(extract_title(html), None);
    }

    #[test]
    fn extract_text_strips_tags_and_scripts() {
        let html = "<html><body><script>evil()</script><p>Hello  world</p></body></html>";
        assert_eq!(extract_text(html), "Hello world");
    }

    #[test]
    fn unescapes_common_entities_in_title() {
        let html = "<title>Fish &amp; Chips</title>";
        assert_eq!(extract_title(html), Some("Fish & Chips".to_string()));
    }
}
