//! Read-model projections for the lifestream pipeline (spec §4.6).
//!
//! # Overview
//!
//! This crate owns the materializer: the single consumer that folds
//! `events.raw` into the domain read-model tables (`link_state`,
//! `link_content`, `link_metadata`, `publish_state`, `sensor_latest`,
//! `todos`, `annotations`, `subjects`). Unlike the router and workers, the
//! materializer never re-publishes to the bus — it is a pure sink.
//!
//! [`handlers`] holds one idempotent, upsert-shaped write per event type;
//! [`materializer`] owns the consumer loop, the per-message transaction
//! boundary, and poison-message handling.
//!
//! # CQRS separation
//!
//! The projection tables this crate writes to can live in the same
//! database as the event ledger or a separate read-replica-style database;
//! either way they are never written to directly by anything but the
//! materializer.
//!
//! ```text
//! Event ledger (write)  →  events.raw  →  Materializer  →  read model (query)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod handlers;
pub mod materializer;

pub use handlers::HandlerError;
pub use materializer::{Materializer, MaterializerError};

/// Run this crate's embedded migrations against `pool`.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails to apply.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
