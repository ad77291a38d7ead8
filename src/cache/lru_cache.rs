use std::num::NonZeroUsize;

use parking_lot::Mutex;

use super::{Cache, CacheType};
use crate::error::{error_codes, CryptoError, CryptoResult};

/// Bounded least-recently-used cache.
///
/// Both loads and stores count as a use.
pub struct LruCache<V> {
    inner: Mutex<lru::LruCache<String, V>>,
    capacity: usize,
}

impl<V> LruCache<V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn new(capacity: usize) -> CryptoResult<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or_else(|| {
            CryptoError::invalid_request(
                "create lru cache",
                "cache size must be greater than zero",
                error_codes::CACHE_CONFIG_INVALID,
            )
        })?;
        Ok(Self {
            inner: Mutex::new(lru::LruCache::new(cap)),
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<V> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<V: Clone + Send + Sync> Cache<V> for LruCache<V> {
    fn load(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    fn store(&self, key: &str, value: V) {
        self.inner.lock().put(key.to_string(), value);
    }

    fn delete(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    fn size(&self) -> usize {
        self.capacity
    }

    fn cache_type(&self) -> CacheType {
        CacheType::Lru
    }
}
