/*!
 * Policy caches
 *
 * The lock manager keeps loaded policies in one of two interchangeable
 * caches: an unbounded concurrent map, or a bounded LRU that evicts the
 * least recently used policy on insert.
 */

mod lru_cache;
mod sync_map;

pub use lru_cache::LruCache;
pub use sync_map::SyncMapCache;

/// Which cache implementation backs a lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    SyncMap,
    Lru,
}

/// A name-keyed cache of shared handles.
///
/// Values are cheap clones (typically `Arc`s); a handle returned by
/// [`Cache::load`] stays valid after the entry is evicted or deleted.
pub trait Cache<V: Clone>: Send + Sync {
    fn load(&self, key: &str) -> Option<V>;

    fn store(&self, key: &str, value: V);

    fn delete(&self, key: &str);

    /// Configured capacity. Unbounded caches report 0.
    fn size(&self) -> usize;

    fn cache_type(&self) -> CacheType;
}
