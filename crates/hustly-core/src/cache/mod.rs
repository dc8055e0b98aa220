//! Named cache stores for the offline gateway.
//!
//! Two backends implement [`CacheStorage`]:
//! - [`MemoryCacheStorage`] for tests and ephemeral deployments
//! - [`SqliteCacheStorage`] for stores that survive restarts
//!
//! A gateway owns two stores per version (static and dynamic); any other
//! store name found at activation belongs to an older version.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryCacheStorage;
pub use sqlite::SqliteCacheStorage;
pub use traits::{CacheStats, CacheStorage, CachedEntry, EvictionPolicy, StoreStats, WriteMode};
