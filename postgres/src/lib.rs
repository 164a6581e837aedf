//! `PostgreSQL`-backed ports for the lifestream event pipeline.
//!
//! Implements the `lifestream-core` traits against a real database:
//!
//! - [`ledger::PostgresEventLedger`]: the durable, append-only event ledger.
//! - [`progress::PostgresConsumerProgressStore`]: database-owned consumer
//!   progress, independent of the bus's own offset commits.
//! - [`idempotency::PostgresIdempotencyLedger`]: exactly-once-effect
//!   tracking on top of the bus's at-least-once delivery.
//! - [`failed_work::FailedWorkQueue`]: the dead-letter queue for work
//!   commands that exhausted their retries.
//!
//! # Example
//!
//! ```ignore
//! use lifestream_postgres::PostgresEventLedger;
//! use sqlx::PgPool;
//!
//! async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = PostgresEventLedger::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod failed_work;
pub mod idempotency;
pub mod ledger;
pub mod progress;

pub use failed_work::{FailedWork, FailedWorkError, FailedWorkQueue, FailedWorkStatus};
pub use idempotency::PostgresIdempotencyLedger;
pub use ledger::PostgresEventLedger;
pub use progress::PostgresConsumerProgressStore;

/// Run this crate's embedded migrations against `pool`.
///
/// # Errors
///
/// Returns the underlying `sqlx` migration error if a migration fails to
/// apply.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
