//! Token bucket rate limiter for data sources.
//!
//! Each source gets its own bucket with configurable capacity and refill rate.
//! Buckets start full. Acquiring on one bucket is serialized by an async mutex;
//! waiters are served in arrival order, and different sources never contend.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SourceConfig;

/// Room for float drift when comparing token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// Token bucket for a single source.
///
/// Invariant: `0 <= tokens <= capacity`.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    /// Tokens per second.
    refill_rate: f64,
    capacity: f64,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: now,
            refill_rate: config.refill_rate,
            capacity: config.capacity,
        }
    }

    /// Add the tokens earned since the last refill.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Wait until one token is available, as of the last refill.
    pub fn time_until_available(&self) -> Duration {
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Rate limiter configuration for a source.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum burst.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&SourceConfig::default())
    }
}

impl From<&SourceConfig> for RateLimitConfig {
    fn from(config: &SourceConfig) -> Self {
        Self {
            capacity: f64::from(config.capacity),
            refill_rate: config.refill_rate,
        }
    }
}

type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Token bucket rate limiter for many sources.
///
/// Buckets are created on first use, from the source's configuration if one
/// was set with [`configure`](Self::configure) or from the default otherwise.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, SharedBucket>,
    configs: DashMap<String, RateLimitConfig>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_default(RateLimitConfig::default())
    }

    /// Limiter whose unconfigured sources use `default_config`.
    pub fn with_default(default_config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            configs: DashMap::new(),
            default_config,
        }
    }

    /// Configure one source. Its bucket is reset to full.
    pub fn configure(&self, source: &str, config: RateLimitConfig) {
        self.configs.insert(source.to_string(), config);
        self.buckets.remove(source);
    }

    /// Wait until a token is granted for `source` and return how long that took.
    ///
    /// Returns `Duration::ZERO` when a token was available right away. Dropping
    /// the future before it resolves consumes no token.
    pub async fn acquire(&self, source: &str) -> Duration {
        let bucket = self.bucket(source);
        let started = Instant::now();

        let (mut guard, contended) = match bucket.try_lock() {
            Ok(guard) => (guard, false),
            Err(_) => (bucket.lock().await, true),
        };

        let mut slept = false;
        while !guard.try_take(Instant::now()) {
            let wait = guard.time_until_available();
            debug!("Rate limiter: waiting {:?} for source '{}'", wait, source);
            tokio::time::sleep(wait).await;
            slept = true;
        }
        drop(guard);

        if slept || contended {
            started.elapsed()
        } else {
            debug!("Rate limiter: acquired token for '{}'", source);
            Duration::ZERO
        }
    }

    /// Take a token without waiting. False if none is available or another
    /// caller is waiting on the bucket.
    pub fn try_acquire(&self, source: &str) -> bool {
        let bucket = self.bucket(source);
        let acquired = match bucket.try_lock() {
            Ok(mut guard) => guard.try_take(Instant::now()),
            Err(_) => false,
        };
        acquired
    }

    /// Tokens currently available. Zero while another caller holds the bucket.
    pub fn remaining_tokens(&self, source: &str) -> f64 {
        let Some(bucket) = self.buckets.get(source).map(|b| Arc::clone(b.value())) else {
            return self.config_for(source).capacity;
        };

        let remaining = match bucket.try_lock() {
            Ok(mut guard) => {
                guard.refill(Instant::now());
                guard.tokens()
            }
            Err(_) => 0.0,
        };
        remaining
    }

    /// Reset a source's bucket to full.
    pub fn reset(&self, source: &str) {
        self.buckets.remove(source);
    }

    fn config_for(&self, source: &str) -> RateLimitConfig {
        self.configs
            .get(source)
            .map(|c| c.value().clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn bucket(&self, source: &str) -> SharedBucket {
        if let Some(bucket) = self.buckets.get(source) {
            return Arc::clone(bucket.value());
        }

        let config = self.config_for(source);
        let entry = self
            .buckets
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(&config, Instant::now()))));
        Arc::clone(entry.value())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: f64, refill_rate: f64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_rate,
        }
    }

    #[test]
    fn test_token_bucket_acquire() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(&config(10.0, 1.0), now);

        for _ in 0..10 {
            assert!(bucket.try_take(now));
        }
        assert!(!bucket.try_take(now));
    }

    #[test]
    fn test_token_bucket_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&config(1.0, 1.0), start);

        assert!(bucket.try_take(start));
        assert!(!bucket.try_take(start));
        assert_eq!(bucket.time_until_available(), Duration::from_secs(1));

        assert!(bucket.try_take(start + Duration::from_secs(2)));
        // Refill never exceeds capacity.
        bucket.refill(start + Duration::from_secs(100));
        assert_eq!(bucket.tokens(), 1.0);
    }

    #[tokio::test]
    async fn test_custom_config_and_reset() {
        let limiter = RateLimiter::new();
        limiter.configure("custom", config(5.0, 0.001));

        for _ in 0..5 {
            assert!(limiter.try_acquire("custom"));
        }
        assert!(!limiter.try_acquire("custom"));

        limiter.reset("custom");
        assert!(limiter.try_acquire("custom"));
    }

    #[tokio::test]
    async fn test_per_source_isolation() {
        let limiter = RateLimiter::with_default(config(2.0, 0.001));

        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));

        assert!(limiter.try_acquire("b"));
    }

    #[tokio::test]
    async fn test_remaining_tokens() {
        let limiter = RateLimiter::with_default(config(10.0, 0.001));
        assert_eq!(limiter.remaining_tokens("fresh"), 10.0);

        limiter.try_acquire("fresh");
        limiter.try_acquire("fresh");
        assert!((limiter.remaining_tokens("fresh") - 8.0).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::with_default(config(2.0, 10.0));

        assert_eq!(limiter.acquire("s").await, Duration::ZERO);
        assert_eq!(limiter.acquire("s").await, Duration::ZERO);

        let waited = limiter.acquire("s").await;
        assert!(waited >= Duration::from_millis(100), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(102), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquire_consumes_nothing() {
        let limiter = RateLimiter::with_default(config(1.0, 1.0));
        assert_eq!(limiter.acquire("s").await, Duration::ZERO);

        let pending = tokio::time::timeout(Duration::from_millis(300), limiter.acquire("s")).await;
        assert!(pending.is_err());

        // The abandoned waiter took nothing: the next token arrives on schedule.
        let waited = limiter.acquire("s").await;
        assert!(waited >= Duration::from_millis(699), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(702), "waited {:?}", waited);
    }
}
