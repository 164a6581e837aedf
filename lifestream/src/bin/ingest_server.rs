//! HTTP ingestion server: `POST /links`, health/readiness, `/metrics`.

use lifestream::config::Config;
use lifestream::server::{build_router, AppState};
use lifestream_postgres::PostgresEventLedger;
use lifestream_runtime::metrics::MetricsServer;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
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

    let mut metrics_server = MetricsServer::new(SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED.into()),
        config.server.metrics_port,
    )));
    metrics_server.start()?;

    let state = AppState::new(ledger, "api", Arc::new(metrics_server));
    let router = build_router(state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>().unwrap_or(std::net::Ipv4Addr::UNSPECIFIED.into()),
        config.server.port,
    ));
    tracing::info!(%addr, "starting ingestion server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down gracefully");
        })
        .await?;

    Ok(())
}
