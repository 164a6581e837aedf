//! # Lifestream Core
//!
//! Core traits and domain types for the lifestream event core: a durable,
//! append-only event ledger with an outbox-forwarded bus, typed domain
//! events, and the bookkeeping traits (`ConsumerProgressStore`,
//! `IdempotencyLedger`) that give at-least-once delivery an exactly-once
//! effect.
//!
//! ## Core Concepts
//!
//! - **Subject**: a typed entity (`kind`, `id`) that events and projections
//!   are about — a link, a sensor stream, a todo.
//! - **Event**: an immutable fact appended to the ledger, never mutated.
//! - **`EventLedger`**: the source of truth; append-only, outbox-flagged.
//! - **`EventBus`**: the distribution layer events are forwarded onto.
//! - **`ConsumerProgressStore`** / **`IdempotencyLedger`**: the two distinct
//!   bookkeeping tables that let a consumer resume after a crash without
//!   reprocessing work twice.
//!
//! ## Architecture Principles
//!
//! - Functional core for identity/normalization, imperative shell for I/O.
//! - Explicit errors, no hidden panics.
//! - Dependency injection via traits (`Clock`, `EventLedger`, `EventBus`, ...)
//!   so every component can be tested against in-memory doubles.

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod domain;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod idempotency;
pub mod identity;
pub mod ledger;
pub mod progress;
pub mod subject;

pub use domain::{DeadLetter, DomainEvent, WorkCommand, WorkType};
pub use event::{EventError, NewEvent, StoredEvent};
pub use event_bus::{EventBus, EventBusError, EventStream, PartitionWatermark};
pub use idempotency::{IdempotencyError, IdempotencyLedger};
pub use ledger::{EventLedger, EventLedgerError};
pub use progress::{ConsumerProgressStore, ProgressError};
pub use subject::{SubjectId, SubjectKind};
