//! HTTP ingestion server (spec §6): a single `POST /links` endpoint plus
//! liveness/readiness checks and a Prometheus scrape endpoint.
//!
//! Mirrors the teacher's `server` module layout: state, health checks, and
//! route wiring each get their own file.

pub mod health;
pub mod ingest;
pub mod routes;
pub mod state;

pub use health::{health_check, readiness_check};
pub use routes::build_router;
pub use state::AppState;
