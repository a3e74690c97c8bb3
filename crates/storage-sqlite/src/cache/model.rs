use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::api_cache)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ApiCacheRow {
    pub source: String,
    pub query_key: String,
    /// JSON text of the provider response.
    pub payload: String,
    /// RFC 3339.
    pub created_at: String,
    pub ttl_ms: i64,
    /// Unix epoch milliseconds; the row is stale from this instant on.
    pub expires_at_ms: i64,
}
