use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket rate limiter. Keys are the owning user for
/// authenticated routes and the remote IP for unauthenticated ones; webhook
/// ingestion and health endpoints are exempt and never call `check`.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_second: f64,
}

impl RateLimiter {
    /// `capacity` is the burst size, `refill_per_minute` the sustained rate.
    pub fn new(capacity: u32, refill_per_minute: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: capacity as f64,
            refill_per_second: refill_per_minute as f64 / 60.0,
        }
    }

    pub fn default_limits() -> Self {
        Self::new(100, 100)
    }

    /// Returns `true` if the request is allowed and consumes one token.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket {
                tokens: self.capacity,
                last_refill: now,
            });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drops buckets untouched for longer than `idle_for`, bounding memory
    /// use under a churn of distinct keys (e.g. many remote IPs).
    pub fn evict_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle_for);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_up_to_capacity() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(!limiter.check("a"));
    }

    #[test]
    fn evict_idle_removes_stale_buckets() {
        let limiter = RateLimiter::new(1, 60);
        limiter.check("a");
        assert_eq!(limiter.len(), 1);
        limiter.evict_idle(Duration::from_secs(0));
        assert_eq!(limiter.len(), 0);
    }
}
