//! Process-local cache store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::debug;
use serde_json::Value;

use super::{CacheEntry, CacheStats, CacheStore};
use crate::clock::{Clock, SystemClock};
use crate::errors::CacheError;

type EntryKey = (String, String);

/// [`CacheStore`] over a sharded concurrent map. Entries are lost on exit.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: DashMap<EntryKey, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_key(source: &str, query_key: &str) -> EntryKey {
    (source.to_string(), query_key.to_string())
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, source: &str, query_key: &str) -> Result<Option<Value>, CacheError> {
        let key = entry_key(source, query_key);
        let now = self.clock.now();

        match self.entries.get(&key) {
            Some(entry) if entry.is_fresh_at(now) => return Ok(Some(entry.payload.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // The read guard is released; only delete if no fresh entry replaced it meanwhile.
        if self
            .entries
            .remove_if(&key, |_, entry| !entry.is_fresh_at(now))
            .is_some()
        {
            debug!("Evicted stale cache entry {}/{}", source, query_key);
        }
        Ok(None)
    }

    fn put(
        &self,
        source: &str,
        query_key: &str,
        payload: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(source, query_key, payload, self.clock.now(), ttl);
        self.entries.insert(entry_key(source, query_key), entry);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let fresh = entry.is_fresh_at(now);
            if !fresh {
                removed += 1;
            }
            fresh
        });
        Ok(removed)
    }

    fn clear_source(&self, source: &str) -> Result<usize, CacheError> {
        let mut removed = 0;
        self.entries.retain(|(entry_source, _), _| {
            let keep = entry_source != source;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut by_source = BTreeMap::new();
        for item in self.entries.iter() {
            *by_source.entry(item.key().0.clone()).or_insert(0) += 1;
        }

        Ok(CacheStats {
            total_entries: by_source.values().sum(),
            by_source,
            location: None,
        })
    }
}
