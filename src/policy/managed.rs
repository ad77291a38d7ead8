use chrono::Utc;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::policy::entry::KeyEntry;
use crate::policy::key_type::{HashType, KeyType};
use crate::policy::Policy;
use crate::storage::Storage;

/// External key system backing `managed_key` policies.
///
/// The policy only records the identifier the system hands back from
/// [`ManagedKeySystem::create_key`]; key material never leaves the system.
pub trait ManagedKeySystem: Send + Sync {
    /// Create a key under `managed_key_name` and return its identifier
    fn create_key(&self, managed_key_name: &str) -> CryptoResult<String>;

    fn encrypt(&self, key_id: &str, plaintext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, key_id: &str, ciphertext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Sign an input the caller already hashed with `hash`
    fn sign(&self, key_id: &str, input: &[u8], hash: HashType) -> CryptoResult<Vec<u8>>;

    fn verify(&self, key_id: &str, input: &[u8], signature: &[u8], hash: HashType) -> CryptoResult<bool>;
}

pub(crate) fn missing_managed_parameters() -> CryptoError {
    CryptoError::invalid_request(
        "managed key",
        "key type is managed_key, but managed key parameters were not provided",
        error_codes::MISSING_KEY_MATERIAL,
    )
}

impl Policy {
    /// Append a version backed by a new key in `system` and persist.
    pub fn rotate_managed_key(
        &mut self,
        storage: &dyn Storage,
        managed_key_name: &str,
        system: &dyn ManagedKeySystem,
    ) -> CryptoResult<()> {
        if self.key_type != KeyType::ManagedKey {
            return Err(CryptoError::invalid_request(
                "rotate managed key",
                &format!("key type {} is not a managed key", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let key_id = system.create_key(managed_key_name)?;

        let prior_latest_version = self.latest_version;
        let prior_min_decryption_version = self.min_decryption_version;
        let prior_keys = self.keys.clone();

        let mut entry = KeyEntry::new(Utc::now());
        entry.managed_key_uuid = key_id;
        self.append_version(entry);

        if let Err(err) = self.persist(storage) {
            self.latest_version = prior_latest_version;
            self.min_decryption_version = prior_min_decryption_version;
            self.keys = prior_keys;
            return Err(err);
        }

        log::info!(
            "rotated managed policy {} to version {} using key {}",
            self.name,
            self.latest_version,
            managed_key_name
        );
        Ok(())
    }
}
