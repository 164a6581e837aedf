//! URL normalization and deterministic subject identity.
//!
//! Pure, synchronous, dependency-free (aside from `url`/`sha2`/`hex`)
//! functions. No network access, no tracing spans — this is CPU-bound
//! work that should never block a worker's cooperative scheduler.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::subject::{SubjectId, SubjectKind};

/// Normalize a URL per the canonicalization rule used to derive subject
/// identity:
///
/// - lowercase the scheme and host
/// - strip the default port for the scheme (80 for http, 443 for https)
/// - strip the fragment
/// - sort query parameters lexicographically by key
/// - strip a trailing slash from the path, unless the path is just `/`
///
/// Two URLs that differ only in these respects normalize to the same
/// string and therefore the same subject ID.
///
/// Total: a `raw` string that doesn't parse as a URL normalizes to itself
/// unchanged. Whether to reject a malformed URL is the caller's decision,
/// not this function's.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };

    parsed.set_fragment(None);

    let scheme = parsed.scheme().to_lowercase();
    let is_default_port = matches!(
        (scheme.as_str(), parsed.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = parsed.set_port(None);
    }

    if let Some(host) = parsed.host_str() {
        let lower = host.to_lowercase();
        let _ = parsed.set_host(Some(&lower));
    }

    if let Some(query) = parsed.query() {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let sorted_query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        parsed.set_query(if sorted_query.is_empty() {
            None
        } else {
            Some(&sorted_query)
        });
    }

    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    parsed.to_string()
}

/// Derive the first 16 hex characters of SHA-256 over `normalized`.
#[must_use]
pub fn short_hash(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Compute the deterministic subject ID for a link, given its raw
/// (not-yet-normalized) URL.
///
/// `id = "link:" + first 16 hex chars of SHA-256(normalize_url(raw))`.
///
/// Total, like [`normalize_url`]: a malformed `raw` still yields a subject
/// id, derived from `raw` itself.
#[must_use]
pub fn subject_id_for_url(raw: &str) -> (SubjectId, String) {
    let normalized = normalize_url(raw);
    let hash = short_hash(&normalized);
    (SubjectId::new(SubjectKind::Link, hash), normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        let normalized = normalize_url("HTTPS://Example.COM/a");
        assert_eq!(normalized, "https://example.com/a");
    }

    #[test]
    fn strips_default_https_port() {
        let normalized = normalize_url("https://example.com:443/a");
        assert_eq!(normalized, "https://example.com/a");
    }

    #[test]
    fn strips_default_http_port() {
        let normalized = normalize_url("http://example.com:80/a");
        assert_eq!(normalized, "http://example.com/a");
    }

    #[test]
    fn keeps_non_default_port() {
        let normalized = normalize_url("https://example.com:8443/a");
        assert_eq!(normalized, "https://example.com:8443/a");
    }

    #[test]
    fn strips_fragment() {
        let normalized = normalize_url("https://example.com/a#section");
        assert_eq!(normalized, "https://example.com/a");
    }

    #[test]
    fn sorts_query_params() {
        let normalized = normalize_url("https://example.com/a?b=2&a=1");
        assert_eq!(normalized, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn strips_trailing_slash_unless_root() {
        assert_eq!(normalize_url("https://example.com/a/"), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn malformed_url_normalizes_to_itself() {
        assert_eq!(normalize_url("not a url"), "not a url");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn scenario_a_from_spec() {
        // subject_id = "link:" + sha256_16("https://example.com/a?a=1&b=2")
        let (id, normalized) = subject_id_for_url("https://Example.com/a?b=2&a=1");
        assert_eq!(normalized, "https://example.com/a?a=1&b=2");
        let expected_hash = short_hash("https://example.com/a?a=1&b=2");
        assert_eq!(id.as_str(), format!("link:{expected_hash}"));
    }

    #[test]
    fn equivalent_urls_produce_same_subject_id() {
        let (id1, _) = subject_id_for_url("https://example.com/a?a=1&b=2");
        let (id2, _) = subject_id_for_url("HTTPS://EXAMPLE.com:443/a?b=2&a=1#frag");
        assert_eq!(id1, id2);
    }

    #[test]
    fn malformed_url_still_yields_a_stable_subject_id() {
        let (id1, _) = subject_id_for_url("not a url");
        let (id2, _) = subject_id_for_url("not a url");
        assert_eq!(id1, id2);
    }
}
