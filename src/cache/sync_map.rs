use dashmap::DashMap;

use super::{Cache, CacheType};

/// Unbounded concurrent map
pub struct SyncMapCache<V> {
    map: DashMap<String, V>,
}

impl<V> SyncMapCache<V> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<V> Default for SyncMapCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for SyncMapCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMapCache")
            .field("entries", &self.map.len())
            .finish()
    }
}

impl<V: Clone + Send + Sync> Cache<V> for SyncMapCache<V> {
    fn load(&self, key: &str) -> Option<V> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn store(&self, key: &str, value: V) {
        self.map.insert(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.map.remove(key);
    }

    fn size(&self) -> usize {
        0
    }

    fn cache_type(&self) -> CacheType {
        CacheType::SyncMap
    }
}
