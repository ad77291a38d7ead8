use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand_core::CryptoRngCore;

use super::request::PolicyRequest;
use crate::cache::{Cache, LruCache, SyncMapCache};
use crate::config::LockManagerConfig;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::locks::{LockTable, StripeGuard};
use crate::policy::{KeyType, Policy, RestoreInfo};
use crate::storage::{archive_path, policy_path, Storage};

/// A loaded policy behind its own reader/writer lock.
///
/// Clones share the policy. The deleted flag is readable without taking
/// the policy lock.
#[derive(Clone)]
pub struct SharedPolicy {
    policy: Arc<RwLock<Policy>>,
    deleted: Arc<AtomicBool>,
}

impl SharedPolicy {
    pub fn new(policy: Policy) -> Self {
        let deleted = policy.deleted_flag();
        Self {
            policy: Arc::new(RwLock::new(policy)),
            deleted,
        }
    }

    /// Shared access for encrypt, decrypt, sign, verify and MAC calls
    pub fn read(&self) -> RwLockReadGuard<'_, Policy> {
        self.policy.read()
    }

    /// Exclusive access for rotate, import, persist and the like
    pub fn write(&self) -> RwLockWriteGuard<'_, Policy> {
        self.policy.write()
    }

    /// Exclusive access if no one else holds the policy
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Policy>> {
        self.policy.try_write()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn ptr_eq(&self, other: &SharedPolicy) -> bool {
        Arc::ptr_eq(&self.policy, &other.policy)
    }
}

impl std::fmt::Debug for SharedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPolicy")
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

/// A policy returned by [`LockManager::get_policy`].
///
/// Without caching the name's stripe stays locked until this value is
/// dropped, so no other caller can load the same policy meanwhile. With
/// caching the stripe is already released and the policy's own lock is
/// the only one that matters.
pub struct LockedPolicy<'a> {
    policy: SharedPolicy,
    upserted: bool,
    stripe: Option<StripeGuard<'a>>,
}

impl LockedPolicy<'_> {
    /// True when this call created the policy
    pub fn upserted(&self) -> bool {
        self.upserted
    }

    /// True when the stripe lock is held for the lifetime of this value
    pub fn holds_stripe(&self) -> bool {
        self.stripe.is_some()
    }

    pub fn shared(&self) -> SharedPolicy {
        self.policy.clone()
    }

    /// Release every lock taken on behalf of the caller.
    pub fn unlock(self) {}
}

impl Deref for LockedPolicy<'_> {
    type Target = SharedPolicy;

    fn deref(&self) -> &SharedPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for LockedPolicy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedPolicy")
            .field("upserted", &self.upserted)
            .field("stripe", &self.stripe)
            .finish()
    }
}

/// Read and decode the policy stored at `path`, applying load-time
/// migrations. A missing entry is `Ok(None)`.
pub fn load_policy(storage: &dyn Storage, path: &str) -> CryptoResult<Option<Policy>> {
    match storage.get(path)? {
        Some(raw) => Policy::from_json(&raw).map(Some),
        None => Ok(None),
    }
}

fn not_found(operation: &str, name: &str) -> CryptoError {
    CryptoError::invalid_request(
        operation,
        &format!("key {:?} not found", name),
        error_codes::POLICY_NOT_FOUND,
    )
}

type PolicyCache = Box<dyn Cache<SharedPolicy>>;

fn build_cache(cache_size: usize) -> CryptoResult<PolicyCache> {
    if cache_size == 0 {
        Ok(Box::new(SyncMapCache::new()))
    } else {
        Ok(Box::new(LruCache::new(cache_size)?))
    }
}

/// Owner of the stripe table and the policy cache.
///
/// # Examples
///
/// ```
/// use transit_keys::config::LockManagerConfig;
/// use transit_keys::lock_manager::{LockManager, PolicyRequest};
/// use transit_keys::policy::{EncryptOptions, KeyType};
/// use transit_keys::storage::InmemStorage;
///
/// let storage = InmemStorage::new();
/// let manager = LockManager::new(LockManagerConfig::default()).unwrap();
/// let request = PolicyRequest::new("orders", KeyType::Aes256Gcm96).upsert();
///
/// let locked = manager
///     .get_policy(&storage, &request, &mut rand::rngs::OsRng)
///     .unwrap()
///     .unwrap();
/// assert!(locked.upserted());
///
/// let policy = locked.read();
/// let ciphertext = policy.encrypt(0, "aGVsbG8=", &EncryptOptions::default()).unwrap();
/// assert!(ciphertext.starts_with("vault:v1:"));
/// ```
pub struct LockManager {
    config: LockManagerConfig,
    locks: LockTable,
    cache: RwLock<Option<PolicyCache>>,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .field("cache_size", &self.cache_size())
            .finish()
    }
}

impl LockManager {
    /// Build a manager. Fails when the configured LRU size is unusable.
    pub fn new(config: LockManagerConfig) -> CryptoResult<Self> {
        let cache = if config.use_cache {
            Some(build_cache(config.cache_size)?)
        } else {
            None
        };
        log::debug!(
            "lock manager ready (cache: {}, size: {})",
            config.use_cache,
            config.cache_size
        );
        Ok(Self {
            config,
            locks: LockTable::new(),
            cache: RwLock::new(cache),
        })
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    pub fn use_cache(&self) -> bool {
        self.config.use_cache
    }

    /// Capacity of the cache; 0 for an unbounded map or no cache.
    pub fn cache_size(&self) -> usize {
        self.cache.read().as_ref().map_or(0, |cache| cache.size())
    }

    /// Replace the cache with an empty one of `cache_size`. Does nothing
    /// when caching is off.
    pub fn init_cache(&self, cache_size: usize) -> CryptoResult<()> {
        if !self.config.use_cache {
            return Ok(());
        }
        let cache = build_cache(cache_size)?;
        *self.cache.write() = Some(cache);
        log::info!("policy cache initialized with size {}", cache_size);
        Ok(())
    }

    /// Drop the cached copy of `name`; the next request reloads it.
    pub fn invalidate_policy(&self, name: &str) {
        let _stripe = self.locks.write(name);
        self.cache_delete(name);
    }

    fn cache_load(&self, name: &str) -> Option<SharedPolicy> {
        self.cache.read().as_ref().and_then(|cache| cache.load(name))
    }

    fn cache_store(&self, name: &str, policy: &SharedPolicy) {
        if let Some(cache) = self.cache.read().as_ref() {
            cache.store(name, policy.clone());
        }
    }

    fn cache_delete(&self, name: &str) {
        if let Some(cache) = self.cache.read().as_ref() {
            cache.delete(name);
        }
    }

    fn load_from_storage(&self, storage: &dyn Storage, name: &str) -> CryptoResult<Option<Policy>> {
        load_policy(storage, &policy_path(&self.config.storage_prefix, name))
    }

    /// Load `req.name`, creating it when missing and `req.upsert` is set.
    ///
    /// Returns `Ok(None)` for a missing policy without upsert and for a
    /// cached policy that has been deleted.
    pub fn get_policy<R: CryptoRngCore>(
        &self,
        storage: &dyn Storage,
        req: &PolicyRequest<'_>,
        rng: &mut R,
    ) -> CryptoResult<Option<LockedPolicy<'_>>> {
        if let Some(cached) = self.cache_load(&req.name) {
            if cached.is_deleted() {
                return Ok(None);
            }
            return Ok(Some(LockedPolicy {
                policy: cached,
                upserted: false,
                stripe: None,
            }));
        }

        // Without a cache the stripe is the only lock on the policy, so it
        // is always taken exclusively
        let stripe = self.locks.write(&req.name);

        if let Some(cached) = self.cache_load(&req.name) {
            if cached.is_deleted() {
                return Ok(None);
            }
            return Ok(Some(LockedPolicy {
                policy: cached,
                upserted: false,
                stripe: None,
            }));
        }

        let (policy, upserted) = match self.load_from_storage(storage, &req.name)? {
            Some(mut policy) => {
                if policy.needs_upgrade() {
                    policy.upgrade(storage, rng)?;
                }
                (policy, false)
            }
            None if !req.upsert => return Ok(None),
            None => (self.create_policy(storage, req, rng)?, true),
        };

        let shared = SharedPolicy::new(policy);
        if self.config.use_cache {
            self.cache_store(&req.name, &shared);
            return Ok(Some(LockedPolicy {
                policy: shared,
                upserted,
                stripe: None,
            }));
        }
        Ok(Some(LockedPolicy {
            policy: shared,
            upserted,
            stripe: Some(stripe),
        }))
    }

    fn create_policy<R: CryptoRngCore>(
        &self,
        storage: &dyn Storage,
        req: &PolicyRequest<'_>,
        rng: &mut R,
    ) -> CryptoResult<Policy> {
        req.validate()?;

        let mut policy = Policy::new(req.policy_config(&self.config.storage_prefix));
        if req.key_type == KeyType::ManagedKey {
            let system = req.managed_keys.ok_or_else(|| {
                CryptoError::invalid_request(
                    "upsert policy",
                    "key type is managed_key, but managed key parameters were not provided",
                    error_codes::MISSING_KEY_MATERIAL,
                )
            })?;
            policy.rotate_managed_key(storage, &req.managed_key_name, system)?;
        } else {
            policy.rotate(storage, rng)?;
        }

        log::info!("created policy {} of type {}", policy.name, policy.key_type);
        Ok(policy)
    }

    /// Add externally generated key material to `req.name`, creating the
    /// policy when it does not exist.
    pub fn import_policy<R: CryptoRngCore>(
        &self,
        storage: &dyn Storage,
        req: &PolicyRequest<'_>,
        key: &[u8],
        rng: &mut R,
    ) -> CryptoResult<()> {
        let _stripe = self.locks.write(&req.name);

        let existing = match self.cache_load(&req.name) {
            // A deletion is in progress; the import is dropped
            Some(cached) if cached.is_deleted() => return Ok(()),
            Some(cached) => Some(cached),
            None => self.load_from_storage(storage, &req.name)?.map(SharedPolicy::new),
        };

        let shared = match existing {
            Some(shared) => shared,
            None => {
                req.validate()?;
                SharedPolicy::new(Policy::new(req.policy_config(&self.config.storage_prefix)))
            }
        };

        shared
            .write()
            .import_public_or_private(storage, key, req.is_private_key, rng)
            .map_err(|err| {
                log::warn!("import into policy {} failed: {}", req.name, err);
                err
            })?;

        self.cache_store(&req.name, &shared);
        Ok(())
    }

    /// Remove `name` from the cache and storage.
    ///
    /// The deleted flag is raised first so holders of the policy stop
    /// writing it.
    pub fn delete_policy(&self, storage: &dyn Storage, name: &str) -> CryptoResult<()> {
        let _stripe = self.locks.write(name);

        let shared = match self.cache_load(name) {
            Some(cached) => cached,
            None => match self.load_from_storage(storage, name)? {
                Some(policy) => SharedPolicy::new(policy),
                None => {
                    return Err(CryptoError::invalid_request(
                        "delete policy",
                        "could not delete key; not found",
                        error_codes::POLICY_NOT_FOUND,
                    ))
                }
            },
        };

        // Held until both storage entries are gone so no holder can
        // persist the policy back in between
        let policy = shared.write();
        if !policy.deletion_allowed {
            return Err(CryptoError::not_allowed(
                "delete policy",
                "deletion is not allowed for this key",
                error_codes::DELETION_DENIED,
            ));
        }

        policy.mark_deleted();
        self.cache_delete(name);

        let prefix = &self.config.storage_prefix;
        storage.delete(&policy_path(prefix, name)).map_err(|err| {
            CryptoError::storage("delete policy", &format!("error deleting key {:?}: {}", name, err))
        })?;
        storage.delete(&archive_path(prefix, name)).map_err(|err| {
            CryptoError::storage(
                "delete policy",
                &format!("error deleting key {:?} archive: {}", name, err),
            )
        })?;

        log::info!("deleted policy {}", name);
        Ok(())
    }

    /// Base64 backup of `name` and its archive.
    pub fn backup_policy(&self, storage: &dyn Storage, name: &str) -> CryptoResult<String> {
        let _stripe = self.locks.write(name);

        let shared = match self.cache_load(name) {
            Some(cached) => cached,
            None => match self.load_from_storage(storage, name)? {
                Some(policy) => SharedPolicy::new(policy),
                None => return Err(not_found("backup policy", name)),
            },
        };
        if shared.is_deleted() {
            return Err(not_found("backup policy", name));
        }

        let mut policy = shared.write();
        policy.backup(storage)
    }

    /// Write a backup produced by [`LockManager::backup_policy`] back to
    /// storage, under `name` when it is non-empty.
    ///
    /// An existing policy of that name is only replaced with `force`.
    pub fn restore_policy(&self, storage: &dyn Storage, name: &str, backup: &str, force: bool) -> CryptoResult<()> {
        let mut data = Policy::decode_backup(backup).map_err(|err| {
            CryptoError::invalid_request(
                "restore policy",
                &format!("failed to decode backup: {}", err),
                error_codes::POLICY_NOT_FOUND,
            )
        })?;

        if !name.is_empty() {
            data.policy.name = name.to_string();
        }
        let name = data.policy.name.clone();
        data.policy.storage_prefix = self.config.storage_prefix.clone();

        let _stripe = self.locks.write(&name);
        let exists = || {
            CryptoError::not_allowed(
                "restore policy",
                &format!("key {:?} already exists", name),
                error_codes::POLICY_EXISTS,
            )
        };

        let cached = self.cache_load(&name);
        if cached.is_some() && !force {
            return Err(exists());
        }
        if cached.is_none() && !force && self.load_from_storage(storage, &name)?.is_some() {
            return Err(exists());
        }

        // Holders of the replaced policy wait until the restore is written
        let _replaced = cached.as_ref().map(SharedPolicy::write);

        data.policy
            .store_archive(storage, &data.archived_keys)
            .map_err(|err| {
                CryptoError::storage(
                    "restore policy",
                    &format!("failed to restore archived keys for key {:?}: {}", name, err),
                )
            })?;

        data.policy.restore_info = Some(RestoreInfo {
            time: Utc::now(),
            version: data.policy.latest_version,
        });
        data.policy.persist(storage).map_err(|err| {
            CryptoError::storage(
                "restore policy",
                &format!("failed to restore the policy {:?}: {}", name, err),
            )
        })?;

        let restored = SharedPolicy::new(data.policy);
        self.cache_store(&name, &restored);
        log::info!("restored policy {} (forced: {})", name, force);
        Ok(())
    }
}
