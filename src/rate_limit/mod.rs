//! Per-client token-bucket rate limiting.
//!
//! A [`RateLimiter`] owns one bucket per client key. Buckets start full, are
//! created on the first request from a key and are never evicted, so memory
//! grows with the number of distinct clients seen
//! (see [`RateLimiter::tracked_clients`]).
//!
//! The limiter is an ordinary value: create it at server start, wrap it in an
//! [`Arc`] and hand it to a [`RateLimitLayer`].
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

pub mod middleware;

pub use middleware::{HeaderKey, KeyExtractor, PeerAddr, RateLimit, RateLimitLayer};

/// Bucket size and refill rate applied to every client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum number of tokens a bucket holds; also its initial fill.
    pub capacity: u32,

    /// Tokens added per second, up to `capacity`.
    pub refill_per_second: f64,
}

impl RateLimiterConfig {
    /// Ten tokens, refilled at five per second.
    pub const fn new() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 5.0,
        }
    }

    /// Configure the bucket capacity.
    pub const fn with_capacity(self, capacity: u32) -> Self {
        Self { capacity, ..self }
    }

    /// Configure the refill rate.
    pub const fn with_refill_per_second(self, refill_per_second: f64) -> Self {
        Self {
            refill_per_second,
            ..self
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimiterConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, config: &RateLimiterConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * config.refill_per_second)
            .min(f64::from(config.capacity));
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket rate limiter keyed by client.
///
/// The key map is locked only long enough to find or create a bucket; each
/// bucket then has its own lock, so clients do not wait on one another.
#[derive(Debug, Default)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::default(),
        }
    }

    /// The configuration every bucket uses.
    pub const fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Consume one token from `client_key`'s bucket, returning whether the
    /// request is admitted. Never waits for a token.
    ///
    /// # Example
    ///
    /// ```rust
    /// use image_xform_pipeline::rate_limit::{RateLimiter, RateLimiterConfig};
    ///
    /// let limiter = RateLimiter::new(RateLimiterConfig::new().with_capacity(2));
    ///
    /// assert!(limiter.allow("203.0.113.7"));
    /// assert!(limiter.allow("203.0.113.7"));
    /// assert!(!limiter.allow("203.0.113.7"));
    /// assert!(limiter.allow("198.51.100.1"));
    /// ```
    pub fn allow(&self, client_key: &str) -> bool {
        self.allow_at(client_key, Instant::now())
    }

    fn allow_at(&self, client_key: &str, now: Instant) -> bool {
        let bucket = self.bucket(client_key, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(&self.config, now)
    }

    fn bucket(&self, client_key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bucket) = buckets.get(client_key) {
            return Arc::clone(bucket);
        }

        tracing::trace!(client = client_key, "tracking new client");
        let bucket = Arc::new(Mutex::new(TokenBucket::full(&self.config, now)));
        buckets.insert(client_key.to_owned(), Arc::clone(&bucket));
        bucket
    }

    /// Number of clients with a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
