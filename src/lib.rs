/*!
 * Transit Key Engine
 *
 * A versioned, named-key engine in the style of a transit secrets backend,
 * plus the SP800-108 key-based key derivation it relies on.
 *
 * The main building blocks are:
 *
 * - [`kbkdf`]: Counter, Feedback and Double-Pipeline KBKDF over HMAC or CMAC
 * - [`policy`]: named, versioned key containers and every operation on them
 * - [`lock_manager`]: striped locking, caching and storage for policies
 * - [`kem_dem`]: Kyber768 + AES-256-GCM hybrid encryption
 *
 * Policies are persisted through the [`storage::Storage`] trait, so callers
 * decide where key material lives.
 */

/// Authenticated encryption used by symmetric and managed policies
pub mod aead;

/// Name-to-policy caches
pub mod cache;

/// Lock manager configuration
pub mod config;

/// Common error types for the engine
pub mod error;

/// SP800-108 key-based key derivation
pub mod kbkdf;

/// Post-quantum hybrid encryption helper
pub mod kem_dem;

/// Get, import, delete, back up and restore policies
pub mod lock_manager;

/// Striped lock table keyed by policy name
pub mod locks;

/// Parser for legacy PKCS#8 Ed25519 private keys
pub mod pkcs8_ed25519;

/// Versioned key policies and the operations they support
pub mod policy;

/// Storage backends for policies and archives
pub mod storage;

pub use config::LockManagerConfig;
pub use error::{CryptoError, CryptoResult};
pub use lock_manager::{LockManager, LockedPolicy, PolicyRequest, SharedPolicy};
pub use policy::{KeyType, Policy};

/// The types most callers need.
///
/// ```
/// use transit_keys::prelude::*;
///
/// let manager = LockManager::new(LockManagerConfig::default()).unwrap();
/// let storage = InmemStorage::new();
/// let request = PolicyRequest::new("orders", KeyType::Aes256Gcm96).upsert();
/// let policy = manager
///     .get_policy(&storage, &request, &mut rand::rngs::OsRng)
///     .unwrap()
///     .unwrap();
///
/// let plaintext = base64::encode(b"hello");
/// let ciphertext = policy
///     .read()
///     .encrypt(0, &plaintext, &EncryptOptions::default())
///     .unwrap();
/// assert!(ciphertext.starts_with("vault:v1:"));
/// ```
pub mod prelude {
    pub use crate::aead::{AeadCipher, AeadProvider};
    pub use crate::config::LockManagerConfig;
    pub use crate::error::{CryptoError, CryptoResult};
    pub use crate::kbkdf::{counter_mode, double_pipeline_mode, feedback_mode, HmacPrf, KbkdfParameter};
    pub use crate::lock_manager::{LockManager, LockedPolicy, PolicyRequest, SharedPolicy};
    pub use crate::policy::{
        DecryptOptions, EncryptOptions, HashType, KeyType, MarshalingType, Policy, SigningOptions,
    };
    pub use crate::storage::{FileStorage, InmemStorage, Storage};
}
