//! Per-destination rate limiting.
//!
//! One token bucket per key, created on first use. Waiting reserves a token
//! up front, so concurrent callers on the same key queue behind each other
//! at one request per interval.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::{DownlinkError, Result};

/// One token every 2.5 seconds.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2_500);
pub const DEFAULT_BURST: u32 = 1;

struct Bucket {
    tokens: f64,
    updated: Instant,
}

pub struct HostRateLimiter {
    interval: Duration,
    burst: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl HostRateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst: burst.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys seen so far.
    pub fn key_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Wait for a token on `key`.
    ///
    /// Fails immediately with [`DownlinkError::RateLimited`], reserving
    /// nothing, when the token would only be ready after `deadline`.
    pub async fn acquire(&self, key: &str, deadline: Instant) -> Result<()> {
        let ready = self.reserve(key, Instant::now(), deadline)?;
        if ready > Instant::now() {
            debug!(key, wait_ms = (ready - Instant::now()).as_millis() as u64, "Rate limit reached, waiting");
            sleep_until(ready).await;
        }
        Ok(())
    }

    fn reserve(&self, key: &str, now: Instant, deadline: Instant) -> Result<Instant> {
        let burst = f64::from(self.burst);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst,
            updated: now,
        });

        let refill = now.saturating_duration_since(bucket.updated).as_secs_f64()
            / self.interval.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(burst);
        bucket.updated = now;

        let ready = if bucket.tokens >= 1.0 {
            now
        } else {
            now + self.interval.mul_f64(1.0 - bucket.tokens)
        };
        if ready > deadline {
            return Err(DownlinkError::RateLimited);
        }

        bucket.tokens -= 1.0;
        Ok(ready)
    }
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(3600)
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_spaced() {
        let limiter = Arc::new(HostRateLimiter::default());
        let start = Instant::now();

        let a = tokio::spawn({
            let limiter = limiter.clone();
            async move {
                limiter.acquire("http://h/a", far()).await.unwrap();
                Instant::now()
            }
        });
        let b = tokio::spawn({
            let limiter = limiter.clone();
            async move {
                limiter.acquire("http://h/a", far()).await.unwrap();
                Instant::now()
            }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        assert_eq!(first - start, Duration::ZERO);
        assert!(second - first >= DEFAULT_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_do_not_wait() {
        let limiter = HostRateLimiter::default();
        let start = Instant::now();
        limiter.acquire("http://a/", far()).await.unwrap();
        limiter.acquire("http://b/", far()).await.unwrap();
        assert_eq!(Instant::now() - start, Duration::ZERO);
        assert_eq!(limiter.key_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_rejects_without_reserving() {
        let limiter = HostRateLimiter::default();
        limiter.acquire("k", far()).await.unwrap();

        let soon = Instant::now() + Duration::from_secs(1);
        assert!(matches!(
            limiter.acquire("k", soon).await,
            Err(DownlinkError::RateLimited)
        ));

        // The failed call left the next token available at +2.5s.
        let start = Instant::now();
        limiter.acquire("k", far()).await.unwrap();
        assert_eq!(Instant::now() - start, DEFAULT_INTERVAL);
    }
}
