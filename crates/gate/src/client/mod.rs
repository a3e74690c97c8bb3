//! Per-source client and the helpers that compose calls through it.

mod cached_fn;
mod query_key;
mod rate_limited;

pub use cached_fn::{with_cache_and_limit, CachedFn};
pub use query_key::derive_query_key;
pub use rate_limited::{CallOptions, Fetched, RateLimitedClient};
