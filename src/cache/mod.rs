//! Offline caching core: partition store, lifecycle, and strategies.
//!
//! Three named partitions back three strategies:
//! - app shell → cache-first (precached at install)
//! - API data → network-first with stale fallback
//! - everything else → stale-while-revalidate
//!
//! Partition names are version-qualified; bumping the version orphans the old
//! partitions, which activation deletes.

mod backend;
mod store;
mod strategy;

pub use backend::{CacheBackend, MemoryBackend, SqliteBackend};
pub use store::{CacheNames, CacheStore};
pub use strategy::Strategies;
