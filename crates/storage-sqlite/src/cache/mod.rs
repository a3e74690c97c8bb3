mod model;
mod repository;

pub use model::ApiCacheRow;
pub use repository::SqliteCacheStore;
