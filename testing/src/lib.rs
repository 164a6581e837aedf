//! # Lifestream Testing
//!
//! In-memory test doubles and fixtures for the lifestream pipeline.
//!
//! This crate provides:
//! - In-memory implementations of every `lifestream-core` port, for tests
//!   that exercise the outbox forwarder, router, workers, and materializer
//!   without a running Postgres or Redpanda.
//! - A deterministic [`mocks::FixedClock`].
//!
//! ## Example
//!
//! ```
//! use lifestream_testing::in_memory::InMemoryEventLedger;
//! use lifestream_core::{EventLedger, NewEvent};
//! use chrono::Utc;
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let ledger = InMemoryEventLedger::new();
//! let event = NewEvent {
//!     occurred_at: Utc::now(),
//!     source: "chrome".to_string(),
//!     subject_id: "link:abc123".parse().unwrap(),
//!     event_type: "link.added".to_string(),
//!     schema_version: 1,
//!     payload: serde_json::json!({"url": "https://example.com"}),
//!     correlation_id: Uuid::new_v4(),
//!     causation_id: None,
//! };
//! let stored = ledger.append(event).await.unwrap();
//! assert!(!stored.forwarded);
//! # }
//! ```

use chrono::{DateTime, Utc};
use lifestream_core::environment::Clock;

pub mod in_memory;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use lifestream_testing::mocks::FixedClock;
    /// use lifestream_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
