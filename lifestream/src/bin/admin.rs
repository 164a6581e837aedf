//! The operator CLI (spec §6): event-emitting admin operations and one
//! infrastructure reset, each wired straight to [`lifestream::admin::AdminOperations`].

use clap::{Parser, Subcommand};
use lifestream::admin::{AdminOperations, OperationReport};
use lifestream::config::Config;
use lifestream_core::domain::Visibility;
use lifestream_postgres::PostgresEventLedger;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lifestream-admin", about = "Operational tools for the lifestream event core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Emit `link.visibility_changed` for one subject or every subject matching `--status`.
    SetVisibility {
        #[arg(long)]
        subject_id: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        visibility: VisibilityArg,
        #[arg(long)]
        dry_run: bool,
    },
    /// Clear cached work and re-emit `link.added` for subjects with pending dead letters.
    RetryFailed {
        #[arg(long)]
        subject_id: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Re-emit `enrichment.completed` for links stuck `enriched` + dirty.
    RecoverStuck {
        #[arg(long)]
        subject_id: Option<String>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Clear the idempotency ledger, consumer progress, and the `forwarded` flag, enabling full replay.
    ResetBus {
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum VisibilityArg {
    Public,
    Private,
}

impl From<VisibilityArg> for Visibility {
    fn from(value: VisibilityArg) -> Self {
        match value {
            VisibilityArg::Public => Visibility::Public,
            VisibilityArg::Private => Visibility::Private,
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
    ).init();

    let cli = Cli::parse();

    // `max_retries` is accepted for CLI symmetry with the router's own
    // policy; it has no independent effect on a single retry-failed run
    // since each dead letter is retried exactly once per invocation.
    if let Command::RetryFailed { max_retries: Some(_), .. } = &cli.command {
        tracing::debug!("--max-retries is informational here; the router enforces the real budget");
    }

    match run(cli).await {
        Ok(report) => {
            print_report(&report);
            std::process::ExitCode::from(0)
        }
        Err(AdminCliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            std::process::ExitCode::from(1)
        }
        Err(AdminCliError::Infrastructure(msg)) => {
            eprintln!("infrastructure error: {msg}");
            std::process::ExitCode::from(2)
        }
    }
}

enum AdminCliError {
    Usage(String),
    Infrastructure(String),
}

async fn run(cli: Cli) -> Result<OperationReport, AdminCliError> {
    let config = Config::from_env();
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await
        .map_err(|e| AdminCliError::Infrastructure(format!("could not connect to database: {e}")))?;

    let ledger: Arc<dyn lifestream_core::EventLedger> = Arc::new(PostgresEventLedger::new(pool.clone()));
    let admin = AdminOperations::new(pool, ledger);

    match cli.command {
        Command::SetVisibility { subject_id, all, status, visibility, dry_run } => {
            if subject_id.is_none() && !all {
                return Err(AdminCliError::Usage("set-visibility requires --subject-id or --all".to_string()));
            }
            admin
                .set_visibility(subject_id.as_deref(), all, status.as_deref(), visibility.into(), dry_run)
                .await
                .map_err(|e| AdminCliError::Infrastructure(e.to_string()))
        }
        Command::RetryFailed { subject_id, limit, dry_run, .. } => admin
            .retry_failed(subject_id.as_deref(), limit, dry_run)
            .await
            .map_err(|e| AdminCliError::Infrastructure(e.to_string())),
        Command::RecoverStuck { subject_id, all, dry_run } => admin
            .recover_stuck(subject_id.as_deref(), all, dry_run)
            .await
            .map_err(|e| AdminCliError::Infrastructure(e.to_string())),
        Command::ResetBus { dry_run } => {
            admin.reset_bus(dry_run).await.map_err(|e| AdminCliError::Infrastructure(e.to_string()))
        }
    }
}

fn print_report(report: &OperationReport) {
    if report.dry_run {
        println!("dry run, no writes made");
    }
    if report.affected.is_empty() {
        println!("no subjects affected");
        return;
    }
    for subject in &report.affected {
        println!("{}: {}", subject.subject_id, subject.action);
    }
    println!("{} subject(s) affected", report.affected.len());
}
