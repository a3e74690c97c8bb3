use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cached provider response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: String,
    pub query_key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        source: impl Into<String>,
        query_key: impl Into<String>,
        payload: Value,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            source: source.into(),
            query_key: query_key.into(),
            payload,
            created_at,
            ttl,
        }
    }

    /// `created_at + ttl`, saturating at the latest representable time.
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Fresh strictly before `expires_at`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}
