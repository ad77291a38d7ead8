use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::Storage;
use crate::error::{CryptoError, CryptoResult};

/// Process-local storage.
///
/// Each operation can be switched to fail, which is how rollback paths are
/// exercised.
#[derive(Default)]
pub struct InmemStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    fail_get: AtomicBool,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
}

impl InmemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }
}

impl std::fmt::Debug for InmemStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InmemStorage")
            .field("entries", &self.len())
            .finish()
    }
}

impl Storage for InmemStorage {
    fn get(&self, path: &str) -> CryptoResult<Option<Vec<u8>>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(CryptoError::storage("get", "get failed"));
        }
        Ok(self.entries.read().get(path).cloned())
    }

    fn put(&self, path: &str, value: &[u8]) -> CryptoResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(CryptoError::storage("put", "put failed"));
        }
        self.entries.write().insert(path.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, path: &str) -> CryptoResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CryptoError::storage("delete", "delete failed"));
        }
        self.entries.write().remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> CryptoResult<Vec<String>> {
        let entries = self.entries.read();
        let mut out: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let child = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if out.last().map(String::as_str) != Some(child) {
                out.push(child.to_string());
            }
        }
        Ok(out)
    }
}
