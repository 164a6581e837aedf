//! The router process: dispatches work and owns retry/DLQ decisions.

use lifestream::config::Config;
use lifestream::projection_queries::ProjectionQueries;
use lifestream::router::Router;
use lifestream_postgres::{FailedWorkQueue, PostgresIdempotencyLedger};
use lifestream_redpanda::RedpandaEventBus;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
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
    lifestream_projections::migrate(&pool).await?;

    let bus: Arc<dyn lifestream_core::EventBus> = Arc::new(RedpandaEventBus::new(&config.redpanda.brokers)?);
    let idempotency: Arc<dyn lifestream_core::IdempotencyLedger> =
        Arc::new(PostgresIdempotencyLedger::new(pool.clone()));
    let queries = Arc::new(ProjectionQueries::new(pool.clone()));
    let dlq = Arc::new(FailedWorkQueue::new(pool));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut router = Router::new(
        bus,
        idempotency,
        queries,
        dlq,
        "events.raw",
        "router",
        config.router.max_attempts,
        shutdown_rx,
    );

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("router received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    router.run().await?;
    Ok(())
}
