use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::ec::Curve;
use super::entry::{codec, ArchivedKeys, BackupInfo, KeyData, KeyEntry, RestoreInfo};
use super::key_type::{
    Kdf, KeyType, CURRENT_CONVERGENT_VERSION, DEFAULT_VERSION_TEMPLATE, HMAC_MAX_KEY_SIZE,
    HMAC_MIN_KEY_SIZE,
};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::storage::{archive_path, policy_path, Storage};

/// Placeholder substituted with the key version in envelope prefixes
pub const VERSION_PLACEHOLDER: &str = "{{version}}";

/// Creation inputs for a [`Policy`]
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub name: String,
    pub key_type: KeyType,
    pub derived: bool,
    pub kdf: Kdf,
    pub convergent_encryption: bool,
    pub exportable: bool,
    pub deletion_allowed: bool,
    pub allow_plaintext_backup: bool,
    pub allow_imported_key_rotation: bool,
    pub version_template: String,
    pub storage_prefix: String,
    pub key_size: usize,
    pub auto_rotate_period: Duration,
}

impl PolicyConfig {
    pub fn new(name: &str, key_type: KeyType) -> Self {
        Self {
            name: name.to_string(),
            key_type,
            ..Default::default()
        }
    }
}

/// A named, versioned key with its operational settings.
///
/// Mutating methods take `&mut self`; callers that share a policy hold it
/// behind the lock manager's per-policy lock.
#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Policy {
    pub name: String,

    /// Single key of pre-versioning policies; moved into `keys` on upgrade
    #[serde(rename = "key", skip_serializing_if = "is_empty_bytes", with = "codec::bytes")]
    pub legacy_key: Zeroizing<Vec<u8>>,

    #[serde(skip_serializing_if = "is_zero_usize")]
    pub key_size: usize,

    #[serde(deserialize_with = "codec::null_as_default")]
    pub keys: BTreeMap<i64, KeyEntry>,

    pub derived: bool,
    pub kdf: Kdf,
    pub convergent_encryption: bool,
    pub exportable: bool,

    pub min_decryption_version: i64,
    pub min_encryption_version: i64,
    pub latest_version: i64,
    pub archive_version: i64,
    pub archive_min_version: i64,
    pub min_available_version: i64,

    pub deletion_allowed: bool,

    /// -1 means each entry's own value is authoritative
    pub convergent_version: i32,

    #[serde(rename = "type")]
    pub key_type: KeyType,

    pub backup_info: Option<BackupInfo>,
    pub restore_info: Option<RestoreInfo>,

    pub allow_plaintext_backup: bool,
    pub version_template: String,
    pub storage_prefix: String,

    #[serde(with = "codec::duration_nanos")]
    pub auto_rotate_period: Duration,

    #[serde(rename = "Imported")]
    pub imported: bool,

    #[serde(rename = "AllowImportedKeyRotation")]
    pub allow_imported_key_rotation: bool,

    #[serde(skip)]
    deleted: Arc<AtomicBool>,

    #[serde(skip)]
    template_parts: OnceLock<(String, String)>,

    #[serde(skip)]
    version_prefix_cache: DashMap<i64, String>,
}

fn is_empty_bytes(v: &Zeroizing<Vec<u8>>) -> bool {
    v.is_empty()
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("key_type", &self.key_type)
            .field("latest_version", &self.latest_version)
            .field("min_decryption_version", &self.min_decryption_version)
            .field("min_encryption_version", &self.min_encryption_version)
            .field("archive_version", &self.archive_version)
            .field("derived", &self.derived)
            .field("convergent_encryption", &self.convergent_encryption)
            .field("keys", &self.keys)
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

pub(crate) fn invariant(cause: &str) -> CryptoError {
    CryptoError::internal("persist", cause, error_codes::POLICY_INVARIANT_VIOLATED)
}

pub(crate) fn random_bytes<R: CryptoRngCore>(rng: &mut R, len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; len]);
    rng.fill_bytes(&mut out);
    out
}

fn key_generation_error(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::internal(
        "rotate",
        &cause.to_string(),
        error_codes::POLICY_KEY_GENERATION_FAILED,
    )
}

impl Policy {
    /// A fresh policy with no key versions. Call [`Policy::rotate`] to mint
    /// the first one.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            name: config.name,
            key_type: config.key_type,
            derived: config.derived,
            kdf: config.kdf,
            convergent_encryption: config.convergent_encryption,
            convergent_version: -1,
            exportable: config.exportable,
            deletion_allowed: config.deletion_allowed,
            allow_plaintext_backup: config.allow_plaintext_backup,
            allow_imported_key_rotation: config.allow_imported_key_rotation,
            version_template: config.version_template,
            storage_prefix: config.storage_prefix,
            key_size: config.key_size,
            auto_rotate_period: config.auto_rotate_period,
            ..Default::default()
        }
    }

    /// Decode a stored policy document.
    pub fn from_json(raw: &[u8]) -> CryptoResult<Self> {
        let mut policy: Policy = serde_json::from_slice(raw)?;
        if policy.key_type.is_rsa() {
            for entry in policy.keys.values_mut() {
                if entry.rsa_public.is_none() {
                    if let Some(private) = &entry.rsa_private {
                        entry.rsa_public = Some(private.to_public_key());
                    }
                }
            }
        }
        Ok(policy)
    }

    /// Encode the policy as its stored JSON document.
    pub fn to_json(&self) -> CryptoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    /// Storage path of this policy
    pub fn storage_path(&self) -> String {
        policy_path(&self.storage_prefix, &self.name)
    }

    fn archive_path(&self) -> String {
        archive_path(&self.storage_prefix, &self.name)
    }

    /// Read the archive. A missing archive is empty.
    pub fn load_archive(&self, storage: &dyn Storage) -> CryptoResult<ArchivedKeys> {
        match storage.get(&self.archive_path())? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(ArchivedKeys::default()),
        }
    }

    pub(crate) fn store_archive(&self, storage: &dyn Storage, archive: &ArchivedKeys) -> CryptoResult<()> {
        let buf = serde_json::to_vec(archive)?;
        storage.put(&self.archive_path(), &buf)
    }

    /// Move keys between the live map and the archive so the live map holds
    /// exactly `min_decryption_version..=latest_version`.
    fn handle_archiving(&mut self, storage: &dyn Storage) -> CryptoResult<()> {
        let keys_contain_minimum = self.keys.contains_key(&self.min_decryption_version);

        if self.min_decryption_version < 1 {
            return Err(invariant("minimum decryption version not set"));
        }
        if self.latest_version < 1 {
            return Err(invariant("latest version not set"));
        }
        if !keys_contain_minimum && self.archive_version != self.latest_version {
            return Err(invariant(
                "need to move keys from archive but archive version not up-to-date",
            ));
        }
        if self.archive_version > self.latest_version {
            return Err(invariant(&format!(
                "archive version of {} is greater than the latest version {}",
                self.archive_version, self.latest_version
            )));
        }
        if self.min_encryption_version > 0 && self.min_encryption_version < self.min_decryption_version {
            return Err(invariant(&format!(
                "minimum decryption version of {} is greater than minimum encryption version {}",
                self.min_decryption_version, self.min_encryption_version
            )));
        }
        if self.min_decryption_version > self.latest_version {
            return Err(invariant(&format!(
                "minimum decryption version of {} is greater than the latest version {}",
                self.min_decryption_version, self.latest_version
            )));
        }

        let mut archive = self.load_archive(storage)?;

        if !keys_contain_minimum {
            for version in self.min_decryption_version..=self.latest_version {
                let index = usize::try_from(version - self.archive_min_version)
                    .map_err(|_| invariant("archive does not reach back to the minimum decryption version"))?;
                let entry = archive.keys.get(index).ok_or_else(|| {
                    invariant(&format!("archive is missing key version {}", version))
                })?;
                self.keys.insert(version, entry.clone());
            }
            log::debug!(
                "restored versions {}..={} of policy {} from archive",
                self.min_decryption_version,
                self.latest_version,
                self.name
            );
            return Ok(());
        }

        let needed = (self.latest_version - self.archive_min_version + 1) as usize;
        if archive.keys.len() < needed {
            archive.keys.resize_with(needed, KeyEntry::default);
        }

        for version in (self.archive_version + 1)..=self.latest_version {
            let entry = self.keys.get(&version).cloned().unwrap_or_default();
            archive.keys[(version - self.archive_min_version) as usize] = entry;
            self.archive_version = version;
        }

        if self.archive_min_version < self.min_available_version {
            let drop = (self.min_available_version - self.archive_min_version) as usize;
            archive.keys.drain(..drop.min(archive.keys.len()));
            self.archive_min_version = self.min_available_version;
        }

        self.store_archive(storage, &archive)?;

        let first_live = self.latest_version - self.keys.len() as i64 + 1;
        let retired: Vec<i64> = (first_live..self.min_decryption_version).collect();
        if !retired.is_empty() {
            for version in &retired {
                self.keys.remove(version);
            }
            log::debug!(
                "archived versions {}..{} of policy {}",
                first_live,
                self.min_decryption_version,
                self.name
            );
        }

        Ok(())
    }

    /// Write the archive and then the policy. On failure the live key map
    /// and archive version are restored.
    pub fn persist(&mut self, storage: &dyn Storage) -> CryptoResult<()> {
        if self.is_deleted() {
            return Err(CryptoError::not_allowed(
                "persist",
                "key has been deleted, not persisting",
                error_codes::POLICY_DELETED,
            ));
        }

        let prior_archive_version = self.archive_version;
        let prior_archive_min_version = self.archive_min_version;
        let prior_keys = self.keys.clone();

        let result = self.handle_archiving(storage).and_then(|_| {
            let buf = self.to_json()?;
            storage.put(&self.storage_path(), &buf)
        });

        if let Err(err) = result {
            log::warn!("failed to persist policy {}: {}; rolling back", self.name, err);
            self.archive_version = prior_archive_version;
            self.archive_min_version = prior_archive_min_version;
            self.keys = prior_keys;
            return Err(err);
        }
        Ok(())
    }

    /// Whether [`Policy::upgrade`] has anything to do
    pub fn needs_upgrade(&self) -> bool {
        !self.legacy_key.is_empty()
            || (self.latest_version == 0 && !self.keys.is_empty())
            || self.min_decryption_version == 0
            || self.archive_version == 0
            || (self.convergent_encryption && self.convergent_version == 0)
            || (self.key_type.hmac_supported() && self.latest_missing_hmac_key())
    }

    fn latest_missing_hmac_key(&self) -> bool {
        self.keys
            .get(&self.latest_version)
            .map_or(true, |entry| entry.hmac_key.is_empty())
    }

    /// Bring a policy written by an older layout up to date and persist it.
    pub fn upgrade<R: CryptoRngCore>(&mut self, storage: &dyn Storage, rng: &mut R) -> CryptoResult<()> {
        let prior_legacy_key = self.legacy_key.clone();
        let prior_latest_version = self.latest_version;
        let prior_min_decryption_version = self.min_decryption_version;
        let prior_convergent_version = self.convergent_version;
        let prior_keys = self.keys.clone();

        let result = self.upgrade_in_place(storage, rng);
        if result.is_err() {
            self.legacy_key = prior_legacy_key;
            self.latest_version = prior_latest_version;
            self.min_decryption_version = prior_min_decryption_version;
            self.convergent_version = prior_convergent_version;
            self.keys = prior_keys;
        }
        result
    }

    fn upgrade_in_place<R: CryptoRngCore>(&mut self, storage: &dyn Storage, rng: &mut R) -> CryptoResult<()> {
        let mut persist_needed = false;

        if !self.legacy_key.is_empty() {
            self.migrate_key_to_keys_map();
            persist_needed = true;
        }

        if self.latest_version == 0 && !self.keys.is_empty() {
            self.latest_version = self.keys.len() as i64;
            persist_needed = true;
        }

        if self.min_decryption_version == 0 {
            self.min_decryption_version = 1;
            persist_needed = true;
        }

        if self.archive_version == 0 {
            persist_needed = true;
        }

        if self.convergent_encryption && self.convergent_version == 0 {
            self.convergent_version = 1;
            persist_needed = true;
        }

        if self.key_type.hmac_supported() && self.latest_missing_hmac_key() {
            let is_hmac = self.key_type == KeyType::Hmac;
            let latest = self.latest_version;
            let entry = self.keys.get_mut(&latest).ok_or_else(|| {
                CryptoError::internal(
                    "upgrade",
                    &format!("latest key version {} is missing from the key map", latest),
                    error_codes::POLICY_UPGRADE_FAILED,
                )
            })?;
            entry.hmac_key = if is_hmac {
                entry.key.clone()
            } else {
                random_bytes(rng, 32)
            };
            persist_needed = true;
        }

        if persist_needed {
            self.persist(storage)?;
            log::info!("upgraded policy {}", self.name);
        }
        Ok(())
    }

    /// Move the pre-versioning single key into version 1.
    pub fn migrate_key_to_keys_map(&mut self) {
        let mut entry = KeyEntry::new(Utc::now());
        entry.key = std::mem::take(&mut self.legacy_key);
        self.keys = BTreeMap::from([(1, entry)]);
    }

    /// Append a freshly generated version and persist.
    pub fn rotate<R: CryptoRngCore>(&mut self, storage: &dyn Storage, rng: &mut R) -> CryptoResult<()> {
        if self.imported && !self.allow_imported_key_rotation {
            return Err(CryptoError::not_allowed(
                "rotate",
                &format!("imported key {} does not allow rotation within Vault", self.name),
                error_codes::POLICY_ROTATION_DENIED,
            ));
        }

        let prior_latest_version = self.latest_version;
        let prior_min_decryption_version = self.min_decryption_version;
        let prior_convergent_version = self.convergent_version;
        let prior_imported = self.imported;
        let prior_keys = self.keys.clone();

        let result = self.rotate_in_memory(rng).and_then(|_| {
            self.imported = false;
            self.persist(storage)
        });

        match result {
            Ok(()) => {
                log::info!("rotated policy {} to version {}", self.name, self.latest_version);
                Ok(())
            }
            Err(err) => {
                self.latest_version = prior_latest_version;
                self.min_decryption_version = prior_min_decryption_version;
                self.convergent_version = prior_convergent_version;
                self.imported = prior_imported;
                self.keys = prior_keys;
                Err(err)
            }
        }
    }

    /// Append a freshly generated version without persisting.
    pub fn rotate_in_memory<R: CryptoRngCore>(&mut self, rng: &mut R) -> CryptoResult<()> {
        let mut entry = KeyEntry::new(Utc::now());

        if !matches!(
            self.key_type,
            KeyType::Aes128Cmac | KeyType::Aes256Cmac | KeyType::Hmac
        ) {
            entry.hmac_key = random_bytes(rng, 32);
        }

        match self.key_type {
            kt if kt.is_symmetric() => {
                let size = match kt {
                    KeyType::Hmac => {
                        if !(HMAC_MIN_KEY_SIZE..=HMAC_MAX_KEY_SIZE).contains(&self.key_size) {
                            return Err(CryptoError::invalid_request(
                                "rotate",
                                &format!(
                                    "invalid key size for HMAC key, must be between {} and {} bytes",
                                    HMAC_MIN_KEY_SIZE, HMAC_MAX_KEY_SIZE
                                ),
                                error_codes::IMPORT_KEY_SIZE_INVALID,
                            ));
                        }
                        self.key_size
                    }
                    other => other.symmetric_key_size().unwrap_or(32),
                };
                entry.key = random_bytes(rng, size);
                if kt == KeyType::Hmac {
                    entry.hmac_key = entry.key.clone();
                }
            }
            kt if kt.is_ecdsa() => {
                let curve = Curve::from_key_type(kt).ok_or_else(|| key_generation_error("unknown curve"))?;
                let parts = curve.generate(rng)?;
                entry.formatted_public_key = curve.public_key_pem(&parts.x, &parts.y)?;
                entry.ec_d = parts.d;
                entry.ec_x = Some(parts.x);
                entry.ec_y = Some(parts.y);
            }
            KeyType::Ed25519 => {
                let signing = ed25519_dalek::SigningKey::generate(rng);
                entry.key = Zeroizing::new(signing.to_keypair_bytes().to_vec());
                entry.formatted_public_key = base64::encode(signing.verifying_key().as_bytes());
            }
            kt if kt.is_rsa() => {
                let bits = kt.rsa_bits().unwrap_or(2048);
                let private = rsa::RsaPrivateKey::new(rng, bits).map_err(key_generation_error)?;
                entry.rsa_public = Some(private.to_public_key());
                entry.rsa_private = Some(private);
            }
            other => {
                return Err(CryptoError::invalid_request(
                    "rotate",
                    &format!("key type {} must be rotated through its key system", other),
                    error_codes::OPERATION_UNSUPPORTED,
                ));
            }
        }

        self.append_version(entry);
        Ok(())
    }

    /// Install `entry` as the new latest version.
    pub(crate) fn append_version(&mut self, mut entry: KeyEntry) {
        if self.convergent_encryption
            && (self.convergent_version == -1 || self.convergent_version > 1)
        {
            entry.convergent_version = CURRENT_CONVERGENT_VERSION;
        }

        self.latest_version += 1;
        self.keys.insert(self.latest_version, entry);

        if self.min_decryption_version == 0 {
            self.min_decryption_version = 1;
        }
    }

    /// Record a backup and return the base64 backup blob.
    pub fn backup(&mut self, storage: &dyn Storage) -> CryptoResult<String> {
        if !self.exportable {
            return Err(CryptoError::not_allowed(
                "backup",
                "exporting is disallowed on the policy",
                error_codes::POLICY_BACKUP_DENIED,
            ));
        }
        if !self.allow_plaintext_backup {
            return Err(CryptoError::not_allowed(
                "backup",
                "plaintext backup is disallowed on the policy",
                error_codes::POLICY_BACKUP_DENIED,
            ));
        }

        let prior_backup_info = self.backup_info.take();
        self.backup_info = Some(BackupInfo {
            time: Utc::now(),
            version: self.latest_version,
        });

        if let Err(err) = self.persist(storage) {
            self.backup_info = prior_backup_info;
            return Err(CryptoError::storage(
                "backup",
                &format!("failed to persist policy with backup info: {}", err),
            ));
        }

        // The archive can change during persist, so read it afterwards
        let archived_keys = self.load_archive(storage)?;
        let data = KeyDataRef {
            policy: self,
            archived_keys: &archived_keys,
        };
        let encoded = serde_json::to_vec(&data)?;

        log::info!("backed up policy {} at version {}", self.name, self.latest_version);
        Ok(base64::encode(encoded))
    }

    /// Decode a backup blob into the policy and its archive.
    pub fn decode_backup(backup: &str) -> CryptoResult<KeyData> {
        let raw = base64::decode(backup.trim())?;
        let mut data: KeyData = serde_json::from_slice(&raw)?;
        // Apply the same load-time migration as storage reads
        let policy_json = serde_json::to_vec(&data.policy)?;
        data.policy = Policy::from_json(&policy_json)?;
        Ok(data)
    }

    /// Parts of the version template around the placeholder.
    pub fn template_parts(&self) -> CryptoResult<(&str, &str)> {
        if let Some((before, after)) = self.template_parts.get() {
            return Ok((before.as_str(), after.as_str()));
        }

        let template = self.effective_template();
        let parts: Vec<&str> = template.split(VERSION_PLACEHOLDER).collect();
        if parts.len() != 2 {
            return Err(CryptoError::internal(
                "version template",
                "error parsing version template",
                error_codes::POLICY_TEMPLATE_INVALID,
            ));
        }

        let (before, after) = self
            .template_parts
            .get_or_init(|| (parts[0].to_string(), parts[1].to_string()));
        Ok((before.as_str(), after.as_str()))
    }

    /// Envelope prefix for `version`
    pub fn version_prefix(&self, version: i64) -> String {
        if let Some(prefix) = self.version_prefix_cache.get(&version) {
            return prefix.clone();
        }
        let prefix = self
            .effective_template()
            .replace(VERSION_PLACEHOLDER, &version.to_string());
        self.version_prefix_cache.insert(version, prefix.clone());
        prefix
    }

    fn effective_template(&self) -> &str {
        if self.version_template.is_empty() {
            DEFAULT_VERSION_TEMPLATE
        } else {
            &self.version_template
        }
    }

    /// Replace the version template and drop cached prefixes.
    pub fn set_version_template(&mut self, template: &str) {
        self.version_template = template.to_string();
        self.template_parts = OnceLock::new();
        self.version_prefix_cache.clear();
    }

    /// Split an envelope into its version and payload.
    pub(crate) fn parse_envelope<'a>(&self, value: &'a str, what: &str) -> CryptoResult<(i64, &'a str)> {
        let (before, after) = self.template_parts()?;
        let malformed = |cause: &str| {
            CryptoError::invalid_request(
                "parse envelope",
                &format!("invalid {}: {}", what, cause),
                error_codes::ENVELOPE_MALFORMED,
            )
        };

        let rest = value.strip_prefix(before).ok_or_else(|| malformed("no prefix"))?;
        let (version, payload) = match rest.split_once(after) {
            Some(split) if !after.is_empty() => split,
            _ => return Err(malformed("wrong number of fields")),
        };
        let version: i64 = version
            .parse()
            .map_err(|_| malformed("version number could not be decoded"))?;
        Ok((version, payload))
    }

    /// Effective convergent scheme for `version`.
    pub fn convergent_version_for(&self, version: i64) -> i32 {
        if !self.convergent_encryption {
            return 0;
        }
        let mut cv = self.convergent_version;
        if cv == 0 {
            cv = 1;
        }
        if let Some(entry) = self.keys.get(&version) {
            if entry.convergent_version != 0 {
                cv = entry.convergent_version;
            }
        }
        cv
    }

    /// Formatted public keys of every live version.
    pub fn public_keys(&self) -> BTreeMap<i64, String> {
        if !self.key_type.import_public_key_supported() {
            return BTreeMap::new();
        }
        self.keys
            .iter()
            .filter_map(|(version, entry)| {
                entry
                    .public_key_pem(self.key_type)
                    .ok()
                    .map(|pem| (*version, pem))
            })
            .collect()
    }

    /// Resolve a requested version: 0 selects the latest. Rejects negative
    /// versions, versions past the latest and versions below `floor`.
    pub(crate) fn resolve_version(&self, requested: i64, floor: i64, purpose: &str) -> CryptoResult<i64> {
        let version = if requested == 0 { self.latest_version } else { requested };
        let fail = |cause: String| {
            CryptoError::invalid_request(purpose, &cause, error_codes::POLICY_VERSION_INVALID)
        };
        if version < 0 {
            return Err(fail(format!("requested version for {} is negative", purpose)));
        }
        if version > self.latest_version {
            return Err(fail(format!(
                "requested version for {} is higher than the latest key version",
                purpose
            )));
        }
        if floor > 0 && version < floor {
            return Err(fail(format!(
                "requested version for {} is less than the minimum encryption key version",
                purpose
            )));
        }
        Ok(version)
    }

    pub(crate) fn entry(&self, version: i64) -> CryptoResult<&KeyEntry> {
        self.keys.get(&version).ok_or_else(|| {
            CryptoError::invalid_request(
                "key lookup",
                "no such key version",
                error_codes::POLICY_VERSION_INVALID,
            )
        })
    }

    /// Deleted-flag handle shared with cache holders
    pub(crate) fn deleted_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.deleted)
    }
}

#[derive(Serialize)]
struct KeyDataRef<'a> {
    policy: &'a Policy,
    archived_keys: &'a ArchivedKeys,
}
