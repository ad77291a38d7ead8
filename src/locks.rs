/*!
 * Striped lock table
 *
 * A fixed array of reader/writer locks. Every policy name maps to one
 * stripe through the first byte of its BLAKE3 digest, so operations on the
 * same name always contend on the same lock.
 */

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of stripes in a [`LockTable`]
pub const LOCK_COUNT: usize = 256;

pub struct LockTable {
    stripes: Vec<RwLock<()>>,
}

/// A held stripe, in either mode
pub enum StripeGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl StripeGuard<'_> {
    pub fn is_write(&self) -> bool {
        matches!(self, StripeGuard::Write(_))
    }
}

impl std::fmt::Debug for StripeGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_write() {
            "StripeGuard::Write"
        } else {
            "StripeGuard::Read"
        })
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            stripes: (0..LOCK_COUNT).map(|_| RwLock::new(())).collect(),
        }
    }

    /// Stripe index for `name`
    pub fn index_for(name: &str) -> usize {
        blake3::hash(name.as_bytes()).as_bytes()[0] as usize % LOCK_COUNT
    }

    pub fn lock_for(&self, name: &str) -> &RwLock<()> {
        &self.stripes[Self::index_for(name)]
    }

    pub fn write(&self, name: &str) -> StripeGuard<'_> {
        StripeGuard::Write(self.lock_for(name).write())
    }

    pub fn read(&self, name: &str) -> StripeGuard<'_> {
        StripeGuard::Read(self.lock_for(name).read())
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}
