//! Binaries and HTTP surface for the personal life stream event pipeline.
//!
//! This crate wires together [`lifestream_core`]'s ports, [`lifestream_postgres`]
//! and [`lifestream_redpanda`]'s adapters, and [`lifestream_projections`]'s
//! materializer into the processes spec.md §4 describes: an HTTP ingestion
//! endpoint, an outbox forwarder, a router, three per-stage workers, the
//! materializer, and an admin CLI. Each process is a thin `main()` under
//! `src/bin/`; the modules here hold the logic each binary drives.

pub mod admin;
pub mod config;
pub mod outbox;
pub mod projection_queries;
pub mod router;
pub mod server;
pub mod worker;
