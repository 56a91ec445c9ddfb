//! Per-client token bucket rate limiting.
//!
//! Each client id gets its own `TokenBucket` in a `DashMap`, rather than a
//! single global bucket, so one noisy client can't starve another's quota.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, rate_per_second: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Returns `(allowed, wait_seconds)`. `wait_seconds` is the time until
    /// one token would be available, and is zero when `allowed` is true.
    fn try_acquire(&mut self, now: Instant) -> (bool, f64) {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            (true, 0.0)
        } else {
            let deficit = 1.0 - self.tokens;
            (false, deficit / self.rate_per_second)
        }
    }
}

/// Per-client token bucket limiter admitting at most `rpm` requests per
/// minute per client id, with a `burst` cap on saved-up tokens.
pub struct RateLimiter {
    buckets: DashMap<String, (TokenBucket, Instant)>,
    rate_per_second: f64,
    burst: f64,
    client_ttl: Duration,
    rejections: AtomicU64,
}

impl RateLimiter {
    pub fn new(rpm: u32, burst: u32, client_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_second: rpm as f64 / 60.0,
            burst: burst as f64,
            client_ttl,
            rejections: AtomicU64::new(0),
        }
    }

    /// Admit or reject a request for `client_id`, returning `(allowed,
    /// wait_seconds)`.
    pub fn acquire(&self, client_id: &str) -> (bool, f64) {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| (TokenBucket::new(self.burst, self.rate_per_second), now));
        entry.1 = now;
        let result = entry.0.try_acquire(now);
        if !result.0 {
            self.rejections.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn rejection_count(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Drop buckets untouched for longer than `client_ttl`, bounding memory
    /// use under a churn of distinct clients.
    pub fn cleanup_stale(&self) {
        let now = Instant::now();
        let ttl = self.client_ttl;
        self.buckets
            .retain(|_, (_, last_seen)| now.duration_since(*last_seen) < ttl);
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}
