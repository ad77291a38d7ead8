use super::*;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, OnceLock};
use std::thread;
use std::time::Duration;

use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::config::LockManagerConfig;
use crate::error::{CryptoError, CryptoResult};
use crate::policy::{EncryptOptions, KeyType, Policy, PolicyConfig};
use crate::storage::{policy_path, InmemStorage, Storage};

fn manager() -> LockManager {
    LockManager::new(LockManagerConfig::default()).unwrap()
}

fn upsert_aes(name: &str) -> PolicyRequest<'static> {
    PolicyRequest::new(name, KeyType::Aes256Gcm96).upsert()
}

#[test]
fn test_get_policy_upserts_once() {
    let storage = InmemStorage::new();
    let lm = manager();

    let first = lm.get_policy(&storage, &upsert_aes("orders"), &mut OsRng).unwrap().unwrap();
    assert!(first.upserted());
    assert!(!first.holds_stripe());
    assert_eq!(first.read().latest_version, 1);
    assert!(storage.contains("policy/orders"));
    assert!(storage.contains("archive/orders"));

    let second = lm.get_policy(&storage, &upsert_aes("orders"), &mut OsRng).unwrap().unwrap();
    assert!(!second.upserted());
    assert!(first.ptr_eq(&second));
}

#[test]
fn test_missing_policy_without_upsert() {
    let storage = InmemStorage::new();
    let lm = manager();
    let request = PolicyRequest::new("absent", KeyType::Aes256Gcm96);
    assert!(lm.get_policy(&storage, &request, &mut OsRng).unwrap().is_none());
    assert!(storage.is_empty());
}

#[test]
fn test_upsert_validation() {
    let storage = InmemStorage::new();
    let lm = manager();
    let cause = |req: PolicyRequest<'_>| match lm.get_policy(&storage, &req, &mut OsRng) {
        Err(CryptoError::InvalidRequest { cause, .. }) => cause,
        other => panic!("unexpected result: {:?}", other.map(|p| p.map(|p| p.upserted()))),
    };

    let mut convergent = upsert_aes("c");
    convergent.convergent = true;
    assert_eq!(cause(convergent), "convergent encryption requires derivation to be enabled");

    let ecdsa = PolicyRequest::new("e", KeyType::EcdsaP256).upsert().derived(false);
    assert_eq!(
        cause(ecdsa),
        "key derivation and convergent encryption not supported for keys of type ecdsa-p256"
    );

    let ed = PolicyRequest::new("ed", KeyType::Ed25519).upsert().derived(true);
    assert_eq!(cause(ed), "convergent encryption not supported for keys of type ed25519");

    let managed = PolicyRequest::new("m", KeyType::ManagedKey).upsert();
    assert!(cause(managed).contains("managed key parameters were not provided"));
    assert!(storage.is_empty());
}

#[test]
fn test_derived_convergent_upsert() {
    let storage = InmemStorage::new();
    let lm = manager();
    let request = upsert_aes("convergent").derived(true);
    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();

    let policy = locked.read();
    assert!(policy.derived);
    assert!(policy.convergent_encryption);
    assert_eq!(policy.kdf, crate::policy::Kdf::HkdfSha256);
    assert_eq!(policy.convergent_version_for(1), 3);
}

#[test]
fn test_hmac_default_key_size() {
    let storage = InmemStorage::new();
    let lm = manager();
    let request = PolicyRequest::new("mac", KeyType::Hmac).upsert();
    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
    assert_eq!(locked.read().keys.get(&1).unwrap().key.len(), 32);
}

#[test]
fn test_uncached_manager_holds_stripe() {
    let storage = InmemStorage::new();
    let lm = LockManager::new(LockManagerConfig::uncached()).unwrap();
    assert!(!lm.use_cache());
    assert_eq!(lm.cache_size(), 0);

    let locked = lm.get_policy(&storage, &upsert_aes("plain"), &mut OsRng).unwrap().unwrap();
    assert!(locked.upserted());
    assert!(locked.holds_stripe());
    {
        let mut policy = locked.write();
        policy.rotate(&storage, &mut OsRng).unwrap();
    }
    locked.unlock();

    let reloaded = lm
        .get_policy(&storage, &PolicyRequest::new("plain", KeyType::Aes256Gcm96), &mut OsRng)
        .unwrap()
        .unwrap();
    assert!(!reloaded.upserted());
    assert_eq!(reloaded.read().latest_version, 2);
}

#[test]
fn test_uncached_handles_exclude_each_other() {
    let storage = InmemStorage::new();
    let lm = LockManager::new(LockManagerConfig::uncached()).unwrap();
    lm.get_policy(&storage, &upsert_aes("serial"), &mut OsRng)
        .unwrap()
        .unwrap()
        .unlock();
    let request = PolicyRequest::new("serial", KeyType::Aes256Gcm96);
    let held = Barrier::new(2);

    let ciphertext = thread::scope(|scope| {
        let first = scope.spawn(|| {
            let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
            held.wait();
            // Give the second lookup time to queue on the stripe
            thread::sleep(Duration::from_millis(100));
            let mut policy = locked.write();
            policy.rotate(&storage, &mut OsRng).unwrap();
            let ciphertext = policy.encrypt(2, "Zmlyc3Q=", &EncryptOptions::default()).unwrap();
            ciphertext
        });

        held.wait();
        let second = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
        // Only granted after the first handle rotated and released
        assert_eq!(second.read().latest_version, 2);
        second.write().rotate(&storage, &mut OsRng).unwrap();
        drop(second);
        first.join().unwrap()
    });

    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
    let policy = locked.read();
    assert_eq!(policy.latest_version, 3);
    assert_eq!(
        policy.decrypt(&ciphertext, &EncryptOptions::default()).unwrap(),
        "Zmlyc3Q="
    );
}

#[test]
fn test_load_upgrades_legacy_policy() {
    let storage = InmemStorage::new();
    let mut legacy = Policy::new(PolicyConfig::new("old", KeyType::Aes256Gcm96));
    legacy.legacy_key = Zeroizing::new(vec![0x42; 32]);
    storage.put(&policy_path("", "old"), &legacy.to_json().unwrap()).unwrap();

    for config in [LockManagerConfig::uncached(), LockManagerConfig::default()] {
        let lm = LockManager::new(config).unwrap();
        let locked = lm
            .get_policy(&storage, &PolicyRequest::new("old", KeyType::Aes256Gcm96), &mut OsRng)
            .unwrap()
            .unwrap();
        let policy = locked.read();
        assert_eq!(policy.latest_version, 1);
        assert!(!policy.needs_upgrade());
        assert_eq!(*policy.keys.get(&1).unwrap().key, vec![0x42; 32]);
    }

    let stored = load_policy(&storage, "policy/old").unwrap().unwrap();
    assert!(!stored.needs_upgrade());
}

#[test]
fn test_delete_policy() {
    let storage = InmemStorage::new();
    let lm = manager();
    let locked = lm.get_policy(&storage, &upsert_aes("doomed"), &mut OsRng).unwrap().unwrap();

    let err = lm.delete_policy(&storage, "doomed").unwrap_err();
    assert!(matches!(err, CryptoError::NotAllowed { .. }));

    {
        let mut policy = locked.write();
        policy.deletion_allowed = true;
        policy.persist(&storage).unwrap();
    }
    let handle = locked.shared();
    drop(locked);

    lm.delete_policy(&storage, "doomed").unwrap();
    assert!(handle.is_deleted());
    assert!(!storage.contains("policy/doomed"));
    assert!(!storage.contains("archive/doomed"));

    // A holder that outlived the deletion can no longer write
    assert!(handle.write().rotate(&storage, &mut OsRng).is_err());
    assert!(lm
        .get_policy(&storage, &PolicyRequest::new("doomed", KeyType::Aes256Gcm96), &mut OsRng)
        .unwrap()
        .is_none());
    assert!(lm.delete_policy(&storage, "doomed").is_err());
}

/// Storage that notes whether the watched policy was unlocked while
/// something was being deleted.
#[derive(Default)]
struct WatchedStorage {
    inner: InmemStorage,
    watched: OnceLock<SharedPolicy>,
    deleted_while_unlocked: AtomicBool,
}

impl Storage for WatchedStorage {
    fn get(&self, path: &str) -> CryptoResult<Option<Vec<u8>>> {
        self.inner.get(path)
    }

    fn put(&self, path: &str, value: &[u8]) -> CryptoResult<()> {
        self.inner.put(path, value)
    }

    fn delete(&self, path: &str) -> CryptoResult<()> {
        if let Some(policy) = self.watched.get() {
            if policy.try_write().is_some() {
                self.deleted_while_unlocked.store(true, Ordering::SeqCst);
            }
        }
        self.inner.delete(path)
    }

    fn list(&self, prefix: &str) -> CryptoResult<Vec<String>> {
        self.inner.list(prefix)
    }
}

#[test]
fn test_delete_holds_policy_lock_across_storage_delete() {
    let storage = WatchedStorage::default();
    let lm = manager();
    let locked = lm.get_policy(&storage, &upsert_aes("guarded"), &mut OsRng).unwrap().unwrap();
    {
        let mut policy = locked.write();
        policy.deletion_allowed = true;
        policy.persist(&storage).unwrap();
    }
    let handle = locked.shared();
    drop(locked);
    storage.watched.set(handle.clone()).unwrap();

    lm.delete_policy(&storage, "guarded").unwrap();
    assert!(handle.is_deleted());
    assert!(!storage.deleted_while_unlocked.load(Ordering::SeqCst));
    assert!(!storage.inner.contains("policy/guarded"));
    assert!(!storage.inner.contains("archive/guarded"));
}

#[test]
fn test_delete_waits_for_concurrent_writer() {
    let storage = InmemStorage::new();
    let lm = manager();
    let locked = lm.get_policy(&storage, &upsert_aes("contended"), &mut OsRng).unwrap().unwrap();
    {
        let mut policy = locked.write();
        policy.deletion_allowed = true;
        policy.persist(&storage).unwrap();
    }
    let handle = locked.shared();
    drop(locked);
    let held = Barrier::new(2);

    thread::scope(|scope| {
        scope.spawn(|| {
            let mut policy = handle.write();
            held.wait();
            thread::sleep(Duration::from_millis(100));
            policy.rotate(&storage, &mut OsRng).unwrap();
        });
        held.wait();
        lm.delete_policy(&storage, "contended").unwrap();
    });

    assert!(handle.is_deleted());
    assert!(!storage.contains("policy/contended"));
    assert!(!storage.contains("archive/contended"));

    // A late writer cannot bring the policy back
    assert!(handle.write().rotate(&storage, &mut OsRng).is_err());
    assert!(!storage.contains("policy/contended"));
}

#[test]
fn test_delete_propagates_storage_failure() {
    let storage = InmemStorage::new();
    let lm = manager();
    let locked = lm.get_policy(&storage, &upsert_aes("sticky"), &mut OsRng).unwrap().unwrap();
    {
        let mut policy = locked.write();
        policy.deletion_allowed = true;
        policy.persist(&storage).unwrap();
    }
    drop(locked);

    storage.set_fail_delete(true);
    assert!(matches!(
        lm.delete_policy(&storage, "sticky"),
        Err(CryptoError::Storage { .. })
    ));
}

#[test]
fn test_backup_and_restore() {
    let storage = InmemStorage::new();
    let lm = manager();
    let request = upsert_aes("vaulted").exportable(true);
    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
    locked.write().rotate(&storage, &mut OsRng).unwrap();
    let ciphertext = locked
        .read()
        .encrypt(1, "c2VjcmV0", &EncryptOptions::default())
        .unwrap();
    drop(locked);

    let backup = lm.backup_policy(&storage, "vaulted").unwrap();
    assert!(lm.backup_policy(&storage, "missing").is_err());

    let err = lm.restore_policy(&storage, "", &backup, false).unwrap_err();
    assert!(matches!(err, CryptoError::NotAllowed { .. }));

    lm.restore_policy(&storage, "", &backup, true).unwrap();
    lm.restore_policy(&storage, "copy", &backup, false).unwrap();

    for name in ["vaulted", "copy"] {
        let locked = lm
            .get_policy(&storage, &PolicyRequest::new(name, KeyType::Aes256Gcm96), &mut OsRng)
            .unwrap()
            .unwrap();
        let policy = locked.read();
        assert_eq!(policy.name, name);
        assert_eq!(policy.latest_version, 2);
        assert_eq!(policy.restore_info.as_ref().unwrap().version, 2);
        assert_eq!(
            policy.decrypt(&ciphertext, &EncryptOptions::default()).unwrap(),
            "c2VjcmV0"
        );
    }
    assert!(storage.contains("archive/copy"));

    // Restoring into an uncached manager still sees the stored copy
    let uncached = LockManager::new(LockManagerConfig::uncached()).unwrap();
    assert!(uncached.restore_policy(&storage, "copy", &backup, false).is_err());
    assert!(uncached.restore_policy(&storage, "", "not base64!", true).is_err());
}

#[test]
fn test_import_policy() {
    let storage = InmemStorage::new();
    let lm = manager();
    let mut request = PolicyRequest::new("imported", KeyType::Aes256Gcm96);
    request.is_private_key = true;

    assert!(lm.import_policy(&storage, &request, &[1u8; 8], &mut OsRng).is_err());
    assert!(!storage.contains("policy/imported"));

    lm.import_policy(&storage, &request, &[1u8; 32], &mut OsRng).unwrap();
    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
    assert!(locked.read().imported);
    assert_eq!(*locked.read().keys.get(&1).unwrap().key, vec![1u8; 32]);

    lm.import_policy(&storage, &request, &[2u8; 32], &mut OsRng).unwrap();
    assert_eq!(locked.read().latest_version, 2);
}

#[test]
fn test_import_into_deleted_policy_is_dropped() {
    let storage = InmemStorage::new();
    let lm = manager();
    let mut request = PolicyRequest::new("retired", KeyType::Aes256Gcm96).upsert();
    request.is_private_key = true;
    let locked = lm.get_policy(&storage, &request, &mut OsRng).unwrap().unwrap();
    locked.read().mark_deleted();
    drop(locked);

    lm.import_policy(&storage, &request, &[7u8; 32], &mut OsRng).unwrap();

    let stored = load_policy(&storage, "policy/retired").unwrap().unwrap();
    assert_eq!(stored.latest_version, 1);
    assert!(!stored.imported);
    assert_ne!(*stored.keys.get(&1).unwrap().key, vec![7u8; 32]);
}

#[test]
fn test_cache_management() {
    let storage = InmemStorage::new();
    let lm = LockManager::new(LockManagerConfig::with_lru(4)).unwrap();
    assert_eq!(lm.cache_size(), 4);

    let first = lm.get_policy(&storage, &upsert_aes("a"), &mut OsRng).unwrap().unwrap().shared();
    lm.invalidate_policy("a");
    let reloaded = lm.get_policy(&storage, &upsert_aes("a"), &mut OsRng).unwrap().unwrap();
    assert!(!reloaded.upserted());
    assert!(!first.ptr_eq(&reloaded));

    lm.init_cache(0).unwrap();
    assert_eq!(lm.cache_size(), 0);
    let after_init = lm.get_policy(&storage, &upsert_aes("a"), &mut OsRng).unwrap().unwrap();
    assert!(!after_init.ptr_eq(&reloaded));

    // LRU eviction falls back to storage
    lm.init_cache(1).unwrap();
    let a = lm.get_policy(&storage, &upsert_aes("a"), &mut OsRng).unwrap().unwrap().shared();
    lm.get_policy(&storage, &upsert_aes("b"), &mut OsRng).unwrap().unwrap();
    let a_again = lm.get_policy(&storage, &upsert_aes("a"), &mut OsRng).unwrap().unwrap();
    assert!(!a.ptr_eq(&a_again));
    assert_eq!(a_again.read().latest_version, 1);
}

#[test]
fn test_concurrent_upsert_creates_one_policy() {
    let storage = InmemStorage::new();
    let lm = manager();
    let upserts = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let locked = lm
                    .get_policy(&storage, &upsert_aes("shared"), &mut OsRng)
                    .unwrap()
                    .unwrap();
                if locked.upserted() {
                    upserts.fetch_add(1, Ordering::SeqCst);
                }
                let policy = locked.read();
                let ciphertext = policy.encrypt(0, "eA==", &EncryptOptions::default()).unwrap();
                assert_eq!(policy.decrypt(&ciphertext, &EncryptOptions::default()).unwrap(), "eA==");
            });
        }
    });

    assert_eq!(upserts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_storage_prefix() {
    let storage = InmemStorage::new();
    let config = LockManagerConfig {
        storage_prefix: "transit/".to_string(),
        ..LockManagerConfig::default()
    };
    let lm = LockManager::new(config).unwrap();
    lm.get_policy(&storage, &upsert_aes("prefixed"), &mut OsRng).unwrap().unwrap();
    assert!(storage.contains("transit/policy/prefixed"));
    assert!(storage.contains("transit/archive/prefixed"));
    assert!(load_policy(&storage, "policy/prefixed").unwrap().is_none());
}
