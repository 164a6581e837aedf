//! Dependency-injection traits shared across components.

use chrono::{DateTime, Utc};

/// Abstracts time so tests can run against a fixed clock instead of the
/// system clock.
///
/// # Examples
///
/// ```ignore
/// struct SystemClock;
/// impl Clock for SystemClock {
///     fn now(&self) -> DateTime<Utc> {
///         Utc::now()
///     }
/// }
/// ```
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}
