/*!
 * Storage collaborator
 *
 * Policies and their archives are persisted as opaque bytes in a key/value
 * store. The engine only needs get, put and delete; `list` is offered for
 * tooling. Concurrency is arbitrated by the lock table, so backends need no
 * compare-and-swap.
 */

mod file;
mod inmem;

pub use file::FileStorage;
pub use inmem::InmemStorage;

use crate::error::CryptoResult;

/// A byte-addressed key/value store.
pub trait Storage: Send + Sync {
    /// Read `path`. A missing entry is `Ok(None)`.
    fn get(&self, path: &str) -> CryptoResult<Option<Vec<u8>>>;

    fn put(&self, path: &str, value: &[u8]) -> CryptoResult<()>;

    /// Remove `path`. Removing a missing entry succeeds.
    fn delete(&self, path: &str) -> CryptoResult<()>;

    /// Immediate children of `prefix`. Sub-folders end with `/`.
    fn list(&self, prefix: &str) -> CryptoResult<Vec<String>>;
}

/// Storage path of a policy
pub fn policy_path(prefix: &str, name: &str) -> String {
    format!("{}policy/{}", prefix, name)
}

/// Storage path of a policy's archive
pub fn archive_path(prefix: &str, name: &str) -> String {
    format!("{}archive/{}", prefix, name)
}

#[cfg(test)]
mod tests;
