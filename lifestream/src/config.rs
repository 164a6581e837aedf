//! Configuration loaded from environment variables (spec §6 "Environment
//! inputs"), modeled on the teacher's `ticketing::config::Config`: nested
//! per-concern structs, a `from_env()` constructor that falls back to
//! development defaults for everything except the values spec §6 calls
//! out as required.

use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Event ledger database.
    pub postgres: PostgresConfig,
    /// Bus connection settings.
    pub redpanda: RedpandaConfig,
    /// HTTP ingestion server settings.
    pub server: ServerConfig,
    /// Per-stage worker settings.
    pub worker: WorkerConfig,
    /// Router retry/DLQ settings.
    pub router: RouterConfig,
}

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection URL. Required: a missing `DATABASE_URL` is a fatal
    /// startup error per spec §6, so this has no built-in fallback outside
    /// local development.
    pub url: String,
    /// Maximum number of pooled connections (spec §5: bounded, default 10).
    pub max_connections: u32,
}

/// Bus connection settings.
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Comma-separated broker list.
    pub brokers: String,
    /// SASL mechanism, if the broker requires authentication.
    pub sasl_mechanism: Option<String>,
    /// SASL username.
    pub sasl_username: Option<String>,
    /// SASL password.
    pub sasl_password: Option<String>,
}

/// HTTP ingestion server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Metrics server port (Prometheus exporter, spec §6 "(NEW)").
    pub metrics_port: u16,
    /// Graceful shutdown deadline in seconds (spec §5, default 30).
    pub shutdown_timeout_secs: u64,
}

/// Per-stage worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fetch timeout in seconds (spec §4.5, default 30).
    pub fetch_timeout_secs: u64,
    /// Minimum interval between requests to the same hostname, in
    /// milliseconds (spec §5, default 1000).
    pub fetch_rate_limit_ms: u64,
    /// Maximum body characters sent to the enrichment model (spec §4.5,
    /// default 32,000).
    pub enrich_char_budget: usize,
    /// Enrichment model endpoint. Optional: if unset, the enricher runs a
    /// local heuristic fallback instead of calling out to a model.
    pub model_api_url: Option<String>,
    /// Enrichment model API key.
    pub model_api_key: Option<String>,
}

/// Router retry/DLQ settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Default `max_attempts` per work type before dead-lettering (spec
    /// §4.4, default 3).
    pub max_attempts: u32,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Panics
    ///
    /// Panics if `DATABASE_URL` or `REDPANDA_BROKERS` is unset: spec §6
    /// requires the database URL and broker list be present, and a missing
    /// required input is a fatal startup error.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            postgres: PostgresConfig {
                url: env::var("DATABASE_URL")
                    .expect("DATABASE_URL must be set (spec: missing required input is fatal)"),
                max_connections: env_parsed("DATABASE_MAX_CONNECTIONS", 10),
            },
            redpanda: RedpandaConfig {
                brokers: env::var("REDPANDA_BROKERS")
                    .expect("REDPANDA_BROKERS must be set (spec: missing required input is fatal)"),
                sasl_mechanism: env::var("REDPANDA_SASL_MECHANISM").ok(),
                sasl_username: env::var("REDPANDA_SASL_USERNAME").ok(),
                sasl_password: env::var("REDPANDA_SASL_PASSWORD").ok(),
            },
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parsed("PORT", 8080),
                metrics_port: env_parsed("METRICS_PORT", 9090),
                shutdown_timeout_secs: env_parsed("SHUTDOWN_TIMEOUT", 30),
            },
            worker: WorkerConfig {
                fetch_timeout_secs: env_parsed("FETCH_TIMEOUT_SECS", 30),
                fetch_rate_limit_ms: env_parsed("FETCH_RATE_LIMIT_MS", 1000),
                enrich_char_budget: env_parsed("ENRICH_CHAR_BUDGET", 32_000),
                model_api_url: env::var("MODEL_API_URL").ok(),
                model_api_key: env::var("MODEL_API_KEY").ok(),
            },
            router: RouterConfig {
                max_attempts: env_parsed("ROUTER_MAX_ATTEMPTS", 3),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default_when_unset() {
        assert_eq!(env_or("LIFESTREAM_DEFINITELY_UNSET_VAR", "fallback"), "fallback");
    }

    #[test]
    fn env_parsed_falls_back_on_missing_or_invalid() {
        assert_eq!(env_parsed::<u16>("LIFESTREAM_DEFINITELY_UNSET_VAR", 42), 42);
    }
}
