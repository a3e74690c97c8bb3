//! Quotegate
//!
//! Rate-limited, caching access layer for financial data providers.
//!
//! # Overview
//!
//! The gate sits between application code and external quote and news
//! providers. It supports:
//! - Per-source token bucket rate limiting with burst capacity
//! - Transparent response caching with per-entry TTL
//! - Retry with exponential backoff on transient failures
//! - Per-source circuit breaking
//! - Fallback across sources for one logical request
//! - Per-source call statistics and recent-error history
//!
//! # Architecture
//!
//! ```text
//! +----------------------+
//! |  MultiSourceFetcher  |  (attempt order, fallback)
//! +----------------------+
//!            |
//!            v
//! +----------------------+     +------------------+
//! |  RateLimitedClient   | --> |    CacheStore    |  (memory or SQLite)
//! +----------------------+     +------------------+
//!            |
//!            v
//! +----------------------+
//! |    CircuitBreaker    |  (per source)
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |     RateLimiter      |  (token bucket per source)
//! +----------------------+
//!            |
//!            v
//! +----------------------+
//! |  Provider (retried)  |  (caller-supplied call)
//! +----------------------+
//! ```
//!
//! Every source's limiter bucket, breaker and client live in a
//! [`SourceRegistry`], together with the shared cache and [`StatsRecorder`].
//!
//! # Core Types
//!
//! - [`GateConfig`] - Per-source settings and fallback chains
//! - [`Provider`] - A raw call to one source
//! - [`Fetched`] - A value and how it was obtained
//! - [`SourceFailure`] - Why one source gave no value
//! - [`GateError`] - Errors surfaced to callers

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod provider;
pub mod registry;
pub mod stats;

pub use cache::{CacheEntry, CacheStats, CacheStore, MemoryCacheStore};
pub use client::{
    derive_query_key, with_cache_and_limit, CachedFn, CallOptions, Fetched, RateLimitedClient,
};
pub use clock::{Clock, SystemClock};
pub use config::{
    CircuitBreakerConfig, ClassificationTable, GateConfig, RetryPolicy, SourceConfig,
};
pub use errors::{
    CacheError, ErrorClass, FailureReason, GateError, ProviderError, Result, SourceFailure,
    TransientKind,
};
pub use fetcher::{FetchDiagnostics, MultiSourceFetcher, SkipReason, SourceCalls};
pub use provider::Provider;
pub use registry::{
    CircuitBreaker, CircuitState, RateLimitConfig, RateLimiter, SourceHealth, SourceRegistry,
    TokenBucket,
};
pub use stats::{ErrorRecord, SourceStats, StatEvent, StatsRecorder};

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::MockClock;
