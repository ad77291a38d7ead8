/*!
 * Lock manager configuration
 */

use serde::{Deserialize, Serialize};

use crate::error::CryptoResult;

/// Settings for a [`crate::lock_manager::LockManager`].
///
/// # Examples
///
/// ```
/// use transit_keys::config::LockManagerConfig;
///
/// let config = LockManagerConfig::from_json(r#"{"cache_size": 128}"#).unwrap();
/// assert!(config.use_cache);
/// assert_eq!(config.cache_size, 128);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    /// Keep loaded policies in memory between requests
    pub use_cache: bool,
    /// 0 selects an unbounded concurrent map, anything else an LRU of that size
    pub cache_size: usize,
    /// Prepended to every storage path
    pub storage_prefix: String,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_size: 0,
            storage_prefix: String::new(),
        }
    }
}

impl LockManagerConfig {
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }

    pub fn with_lru(cache_size: usize) -> Self {
        Self {
            cache_size,
            ..Self::default()
        }
    }
}
