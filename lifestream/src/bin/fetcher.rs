//! The fetch worker process.

use lifestream::config::Config;
use lifestream::worker::fetcher::HttpFetcher;
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

    let worker = Arc::new(HttpFetcher::new(
        Duration::from_secs(config.worker.fetch_timeout_secs),
        Duration::from_millis(config.worker.fetch_rate_limit_ms),
        "fetcher-1",
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("fetcher received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    run_stage_worker(worker, bus, ledger, "fetcher", "agent:fetcher", shutdown_rx).await?;
    Ok(())
}
