//! Per-source shared state.
//!
//! This module provides:
//! - Rate limiting per source
//! - Circuit breaking for fault tolerance
//! - The registry tying them to one client per source

mod circuit_breaker;
mod rate_limiter;
mod registry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::{RateLimitConfig, RateLimiter, TokenBucket};
pub use registry::{SourceHealth, SourceRegistry};
