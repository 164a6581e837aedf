//! The materializer process: projects `events.raw` into the read model.

use lifestream::config::Config;
use lifestream_projections::materializer::Materializer;
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
    let progress: Arc<dyn lifestream_core::ConsumerProgressStore> =
        Arc::new(lifestream_postgres::PostgresConsumerProgressStore::new(pool.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut materializer =
        Materializer::new(pool, bus, progress, "events.raw", "materializer", shutdown_rx);

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("materializer received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    materializer.run().await?;
    Ok(())
}
