use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CacheError;

/// Store for provider responses, keyed by `(source, query_key)`.
///
/// Implementations must be safe to share between tasks. Concurrent writes to
/// one key are last-writer-wins; nothing is transactional across keys.
pub trait CacheStore: Send + Sync {
    /// Returns the payload while the entry is fresh.
    ///
    /// A stale entry reads as `None` and may be deleted, but only if it is
    /// still the stale one: an entry written concurrently survives.
    fn get(&self, source: &str, query_key: &str) -> Result<Option<Value>, CacheError>;

    /// Stores `payload` for `ttl`, replacing any existing entry.
    fn put(
        &self,
        source: &str,
        query_key: &str,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Deletes every expired entry and returns how many were removed.
    fn purge_expired(&self) -> Result<usize, CacheError>;

    /// Deletes every entry of one source and returns how many were removed.
    fn clear_source(&self, source: &str) -> Result<usize, CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Entry counts of a cache store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub by_source: BTreeMap<String, usize>,
    /// Where the entries live, e.g. a database path. `None` for memory stores.
    pub location: Option<String>,
}
