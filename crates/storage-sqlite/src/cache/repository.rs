//! Persistent [`CacheStore`] over the `api_cache` table.
//!
//! Expiry is stored as epoch milliseconds so that staleness checks and purges
//! are plain indexed comparisons.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::debug;
use quotegate::{CacheError, CacheStats, CacheStore, Clock, SystemClock};
use serde_json::Value;

use super::model::ApiCacheRow;
use crate::db::{self, DbConnection, DbPool};
use crate::errors::Result;
use crate::schema::api_cache as api_cache_table;

pub struct SqliteCacheStore {
    pool: Arc<DbPool>,
    location: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqliteCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheStore")
            .field("location", &self.location)
            .finish()
    }
}

impl SqliteCacheStore {
    /// Open (or create) the cache database at `db_path` and apply migrations.
    pub fn open(db_path: &str) -> Result<Self> {
        db::init(db_path)?;
        let pool = db::create_pool(db_path)?;
        db::run_migrations(&pool)?;
        Ok(Self::new(pool, db_path))
    }

    /// Store over an already migrated pool.
    pub fn new(pool: Arc<DbPool>, location: impl Into<String>) -> Self {
        Self {
            pool,
            location: location.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn conn(&self) -> Result<DbConnection> {
        db::get_connection(&self.pool)
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn read(&self, source_id: &str, key: &str) -> Result<Option<Value>> {
        use crate::schema::api_cache::dsl::*;

        let mut conn = self.conn()?;
        let now = self.now_ms();

        let row: Option<ApiCacheRow> = api_cache
            .find((source_id, key))
            .select(ApiCacheRow::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };
        if now < row.expires_at_ms {
            return Ok(Some(serde_json::from_str(&row.payload)?));
        }

        // Only the stale row goes; a row rewritten since the read is kept.
        let deleted = diesel::delete(
            api_cache
                .filter(source.eq(source_id))
                .filter(query_key.eq(key))
                .filter(expires_at_ms.le(now)),
        )
        .execute(&mut conn)?;
        if deleted > 0 {
            debug!("Evicted stale cache entry {}/{}", source_id, key);
        }
        Ok(None)
    }

    fn write(&self, source_id: &str, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let created = self.clock.now();
        let row = new_row(source_id, key, &value, created, ttl)?;

        let mut conn = self.conn()?;
        diesel::replace_into(api_cache_table::table)
            .values(&row)
            .execute(&mut conn)?;
        Ok(())
    }

    fn purge(&self) -> Result<usize> {
        use crate::schema::api_cache::dsl::*;

        let mut conn = self.conn()?;
        let removed = diesel::delete(api_cache.filter(expires_at_ms.le(self.now_ms())))
            .execute(&mut conn)?;
        Ok(removed)
    }

    fn clear(&self, source_id: &str) -> Result<usize> {
        use crate::schema::api_cache::dsl::*;

        let mut conn = self.conn()?;
        let removed = diesel::delete(api_cache.filter(source.eq(source_id))).execute(&mut conn)?;
        Ok(removed)
    }

    fn counts(&self) -> Result<CacheStats> {
        use crate::schema::api_cache::dsl::*;

        let mut conn = self.conn()?;
        let rows: Vec<(String, i64)> = api_cache
            .group_by(source)
            .select((source, diesel::dsl::count_star()))
            .load(&mut conn)?;

        let by_source: BTreeMap<String, usize> = rows
            .into_iter()
            .map(|(id, count)| (id, usize::try_from(count).unwrap_or(0)))
            .collect();
        Ok(CacheStats {
            total_entries: by_source.values().sum(),
            by_source,
            location: Some(self.location.clone()),
        })
    }
}

fn new_row(
    source_id: &str,
    key: &str,
    value: &Value,
    created: DateTime<Utc>,
    ttl: Duration,
) -> Result<ApiCacheRow> {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    Ok(ApiCacheRow {
        source: source_id.to_string(),
        query_key: key.to_string(),
        payload: serde_json::to_string(value)?,
        created_at: created.to_rfc3339(),
        ttl_ms,
        expires_at_ms: created.timestamp_millis().saturating_add(ttl_ms),
    })
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, source: &str, query_key: &str) -> std::result::Result<Option<Value>, CacheError> {
        Ok(self.read(source, query_key)?)
    }

    fn put(
        &self,
        source: &str,
        query_key: &str,
        payload: Value,
        ttl: Duration,
    ) -> std::result::Result<(), CacheError> {
        Ok(self.write(source, query_key, payload, ttl)?)
    }

    fn purge_expired(&self) -> std::result::Result<usize, CacheError> {
        let removed = self.purge()?;
        debug!("Purged {} expired cache entries from {}", removed, self.location);
        Ok(removed)
    }

    fn clear_source(&self, source: &str) -> std::result::Result<usize, CacheError> {
        Ok(self.clear(source)?)
    }

    fn stats(&self) -> std::result::Result<CacheStats, CacheError> {
        Ok(self.counts()?)
    }
}
