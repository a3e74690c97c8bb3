//! Response cache.
//!
//! [`CacheStore`] is the storage seam. [`MemoryCacheStore`] keeps entries in
//! process; the `quotegate-storage-sqlite` crate provides a durable store.

mod entry;
mod memory;
mod traits;

pub use entry::CacheEntry;
pub use memory::MemoryCacheStore;
pub use traits::{CacheStats, CacheStore};
