//! Per-hostname rate limiting for the fetcher (spec §5): a token bucket per
//! hostname, capacity 1, refilling at a configurable rate, so a burst of
//! links to the same site gets spaced out instead of hammering it.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A token bucket per hostname, capacity 1.
pub struct HostnameRateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl HostnameRateLimiter {
    /// Build a limiter enforcing `min_interval` between requests to the
    /// same hostname (default 1 second per spec §5).
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a request to `hostname` is allowed, then record it as
    /// having happened now.
    pub async fn acquire(&self, hostname: &str) {
        let wait = {
            let mut last_request = self.last_request.lock().await;
            let now = Instant::now();
            let wait = last_request
                .get(hostname)
                .and_then(|last| self.min_interval.checked_sub(now.duration_since(*last)));
            last_request.insert(hostname.to_string(), now + wait.unwrap_or_default());
            wait
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_to_a_hostname_never_waits() {
        let limiter = HostnameRateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.acquire("example.com").await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn second_request_to_the_same_hostname_is_spaced_out() {
        let limiter = HostnameRateLimiter::new(Duration::from_millis(50));
        limiter.acquire("example.com").await;
        let start = Instant::now();
        limiter.acquire("example.com").await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn different_hostnames_do_not_contend() {
        let limiter = HostnameRateLimiter::new(Duration::from_millis(200));
        limiter.acquire("a.example.com").await;
        let start = Instant::now();
        limiter.acquire("b.example.com").await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
