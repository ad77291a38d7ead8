/*!
 * Lock manager
 *
 * Hands out shared, lockable handles to named policies. Loading, creating,
 * importing, deleting, backing up and restoring a policy all go through
 * the stripe of the lock table that its name hashes to, and loaded
 * policies are kept in the configured cache.
 */

mod manager;
mod request;

pub use manager::{load_policy, LockManager, LockedPolicy, SharedPolicy};
pub use request::PolicyRequest;

#[cfg(test)]
mod tests;
