use std::time::Duration;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::policy::{Kdf, KeyType, ManagedKeySystem, PolicyConfig, HMAC_DEFAULT_KEY_SIZE};

/// What a caller wants from [`LockManager::get_policy`](super::LockManager::get_policy)
/// and [`LockManager::import_policy`](super::LockManager::import_policy).
///
/// Everything except `name` only matters when the policy does not exist
/// yet and is created by the call.
#[derive(Clone, Default)]
pub struct PolicyRequest<'a> {
    pub name: String,
    pub key_type: KeyType,
    /// HMAC key length in bytes; 0 picks the default
    pub key_size: usize,
    pub derived: bool,
    pub convergent: bool,
    pub exportable: bool,
    pub allow_plaintext_backup: bool,
    pub auto_rotate_period: Duration,
    pub allow_imported_key_rotation: bool,
    /// Import material is a private key rather than a PEM public key
    pub is_private_key: bool,
    /// Create the policy when it is missing
    pub upsert: bool,
    /// Key system and key name backing a new `managed_key` policy
    pub managed_key_name: String,
    pub managed_keys: Option<&'a dyn ManagedKeySystem>,
}

impl<'a> PolicyRequest<'a> {
    pub fn new(name: &str, key_type: KeyType) -> Self {
        Self {
            name: name.to_string(),
            key_type,
            ..Default::default()
        }
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn derived(mut self, convergent: bool) -> Self {
        self.derived = true;
        self.convergent = convergent;
        self
    }

    pub fn exportable(mut self, allow_plaintext_backup: bool) -> Self {
        self.exportable = true;
        self.allow_plaintext_backup = allow_plaintext_backup;
        self
    }

    pub fn with_managed_key(mut self, name: &str, system: &'a dyn ManagedKeySystem) -> Self {
        self.managed_key_name = name.to_string();
        self.managed_keys = Some(system);
        self
    }

    /// Reject derivation and convergence settings the key type cannot honor.
    pub(crate) fn validate(&self) -> CryptoResult<()> {
        let reject = |cause: String| {
            CryptoError::invalid_request("upsert policy", &cause, error_codes::OPERATION_UNSUPPORTED)
        };

        match self.key_type {
            kt if kt.is_aead() => {
                if self.convergent && !self.derived {
                    return Err(reject("convergent encryption requires derivation to be enabled".into()));
                }
            }
            KeyType::Ed25519 => {
                if self.convergent {
                    return Err(reject(format!(
                        "convergent encryption not supported for keys of type {}",
                        self.key_type
                    )));
                }
            }
            _ => {
                if self.derived || self.convergent {
                    return Err(reject(format!(
                        "key derivation and convergent encryption not supported for keys of type {}",
                        self.key_type
                    )));
                }
            }
        }
        Ok(())
    }

    /// Creation settings for a new policy stored under `storage_prefix`
    pub(crate) fn policy_config(&self, storage_prefix: &str) -> PolicyConfig {
        let key_size = match (self.key_type, self.key_size) {
            (KeyType::Hmac, 0) => HMAC_DEFAULT_KEY_SIZE,
            (_, size) => size,
        };

        let mut config = PolicyConfig {
            derived: self.derived,
            exportable: self.exportable,
            allow_plaintext_backup: self.allow_plaintext_backup,
            allow_imported_key_rotation: self.allow_imported_key_rotation,
            auto_rotate_period: self.auto_rotate_period,
            storage_prefix: storage_prefix.to_string(),
            key_size,
            ..PolicyConfig::new(&self.name, self.key_type)
        };
        if self.derived {
            config.kdf = Kdf::HkdfSha256;
            config.convergent_encryption = self.convergent;
        }
        config
    }
}
