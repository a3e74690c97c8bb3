//! SQLite cache store for quotegate.
//!
//! Provides a [`CacheStore`](quotegate::CacheStore) whose entries survive
//! restarts, using Diesel over an r2d2 pool:
//! - Database connection pooling and WAL setup
//! - Embedded Diesel migrations
//! - [`SqliteCacheStore`], the persistent `api_cache` table
//!
//! ```text
//!        quotegate (gate)
//!               │  CacheStore
//!               ▼
//!   storage-sqlite (this crate)
//!               │
//!               ▼
//!           SQLite DB
//! ```

pub mod cache;
pub mod db;
pub mod errors;
pub mod schema;

pub use cache::{ApiCacheRow, SqliteCacheStore};
pub use db::{
    create_pool, get_connection, get_db_path, init, run_migrations, DbConnection, DbPool,
    CACHE_PATH_ENV,
};
pub use errors::StorageError;
