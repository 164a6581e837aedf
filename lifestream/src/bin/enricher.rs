//! The enrich worker process.

use lifestream::config::Config;
use lifestream::worker::enricher::{seed_catalog_from_bus, HttpEnricher, TagCatalog};
use lifestream::worker::run_stage_worker;
use lifestream_postgres::PostgresEventLedger;
use lifestream_redpanda::RedpandaEventBus;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;
    lifestream_postgres::migrate(&pool).await?;

    let ledger: Arc<dyn lifestream_core::EventLedger> = Arc::new(PostgresEventLedger::new(pool));
    let bus: Arc<dyn lifestream_core::EventBus> = Arc::new(RedpandaEventBus::new(&config.redpanda.brokers)?);

    if config.worker.model_api_url.is_none() {
        tracing::warn!("MODEL_API_URL not set, enricher is running the local heuristic fallback");
    }

    let catalog = Arc::new(TagCatalog::new());
    if let Err(e) = seed_catalog_from_bus(bus.as_ref(), &catalog, "enricher-catalog-seed", Duration::from_secs(2)).await {
        tracing::warn!(error = %e, "could not seed tag catalog from bus, starting empty");
    }

    let worker = Arc::new(HttpEnricher::new(
        Duration::from_secs(config.worker.fetch_timeout_secs),
        config.worker.enrich_char_budget,
        config.worker.model_api_url.clone(),
        config.worker.model_api_key.clone(),
        catalog,
        Some(Arc::clone(&bus)),
        "enricher-1",
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("enricher received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    run_stage_worker(worker, bus, ledger, "enricher", "agent:enricher", shutdown_rx).await?;
    Ok(())
}
