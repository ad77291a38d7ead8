use hmac::{Hmac, Mac};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::key_type::{HashType, KeyType};
use super::policy::Policy;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::kbkdf::{CmacPrf, Prf};

/// AES block size, the full CMAC tag length
pub const CMAC_MAX_LENGTH: usize = 16;

fn key_lookup_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("mac key", cause, error_codes::POLICY_VERSION_INVALID)
}

fn compute_hmac(hash: HashType, key: &[u8], input: &[u8]) -> CryptoResult<Vec<u8>> {
    with_digest!(hash, D => {
        let mut mac = Hmac::<D>::new_from_slice(key)
            .map_err(|e| CryptoError::internal("hmac", &e.to_string(), error_codes::OPERATION_UNSUPPORTED))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    })
}

fn cmac_length(requested: usize) -> CryptoResult<usize> {
    match requested {
        0 => Ok(CMAC_MAX_LENGTH),
        n if n <= CMAC_MAX_LENGTH => Ok(n),
        n => Err(CryptoError::invalid_request(
            "cmac",
            &format!("mac length {} exceeds the maximum of {} bytes", n, CMAC_MAX_LENGTH),
            error_codes::OPERATION_UNSUPPORTED,
        )),
    }
}

impl Policy {
    fn check_mac_version(&self, version: i64) -> CryptoResult<()> {
        if version < 0 {
            return Err(key_lookup_error("key version does not exist (cannot be negative)"));
        }
        if version > self.latest_version {
            return Err(key_lookup_error(&format!(
                "key version does not exist; latest key version is {}",
                self.latest_version
            )));
        }
        Ok(())
    }

    /// HMAC key of `version`. For the `hmac` key type this is the key itself.
    pub fn hmac_key(&self, version: i64) -> CryptoResult<Zeroizing<Vec<u8>>> {
        self.check_mac_version(version)?;
        let entry = self.entry(version)?;

        if self.key_type == KeyType::Hmac {
            return Ok(entry.key.clone());
        }
        if entry.hmac_key.is_empty() {
            return Err(CryptoError::invalid_request(
                "hmac key",
                "no HMAC key exists for that key version",
                error_codes::MISSING_KEY_MATERIAL,
            ));
        }
        Ok(entry.hmac_key.clone())
    }

    /// CMAC key of `version`; only CMAC key types have one.
    pub fn cmac_key(&self, version: i64) -> CryptoResult<Zeroizing<Vec<u8>>> {
        self.check_mac_version(version)?;
        let entry = self.entry(version)?;

        if self.key_type.cmac_supported() {
            return Ok(entry.key.clone());
        }
        Err(CryptoError::invalid_request(
            "cmac key",
            &format!("key type {} does not support CMAC operations", self.key_type),
            error_codes::OPERATION_UNSUPPORTED,
        ))
    }

    /// Version-prefixed base64 HMAC of `input` under `version` (0 for latest).
    pub fn hmac(&self, version: i64, hash: HashType, input: &[u8]) -> CryptoResult<String> {
        if !self.key_type.hmac_supported() {
            return Err(CryptoError::invalid_request(
                "hmac",
                &format!("HMAC not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }
        let version = self.resolve_version(version, self.min_encryption_version, "hmac")?;
        let key = self.hmac_key(version)?;
        let tag = compute_hmac(hash, &key, input)?;
        Ok(format!("{}{}", self.version_prefix(version), base64::encode(tag)))
    }

    /// Check a version-prefixed HMAC produced by [`Policy::hmac`].
    pub fn verify_hmac(&self, input: &[u8], hash: HashType, envelope: &str) -> CryptoResult<bool> {
        let (version, expected) = self.mac_envelope(envelope, "HMAC")?;
        let key = self.hmac_key(version)?;
        let tag = compute_hmac(hash, &key, input)?;
        Ok(bool::from(tag.ct_eq(&expected)))
    }

    /// Version-prefixed base64 CMAC of `input`, truncated to `mac_length`
    /// bytes (0 for the full tag).
    pub fn cmac(&self, version: i64, input: &[u8], mac_length: usize) -> CryptoResult<String> {
        let length = cmac_length(mac_length)?;
        let version = self.resolve_version(version, self.min_encryption_version, "cmac")?;
        let key = self.cmac_key(version)?;
        let tag = CmacPrf::new(&key)?.compute(input)?;
        Ok(format!("{}{}", self.version_prefix(version), base64::encode(&tag[..length])))
    }

    /// Check a version-prefixed CMAC produced by [`Policy::cmac`]; the tag
    /// length is taken from the envelope.
    pub fn verify_cmac(&self, input: &[u8], envelope: &str) -> CryptoResult<bool> {
        let (version, expected) = self.mac_envelope(envelope, "CMAC")?;
        if expected.is_empty() || expected.len() > CMAC_MAX_LENGTH {
            return Ok(false);
        }
        let key = self.cmac_key(version)?;
        let tag = CmacPrf::new(&key)?.compute(input)?;
        Ok(bool::from(tag[..expected.len()].ct_eq(&expected)))
    }

    fn mac_envelope(&self, envelope: &str, what: &str) -> CryptoResult<(i64, Vec<u8>)> {
        let (version, payload) = self.parse_envelope(envelope, what)?;
        if version > self.latest_version {
            return Err(CryptoError::invalid_request(
                "verify mac",
                &format!("invalid {}: version is too new", what),
                error_codes::POLICY_VERSION_INVALID,
            ));
        }
        if self.min_decryption_version > 0 && version < self.min_decryption_version {
            return Err(CryptoError::too_old(version));
        }
        let decoded = base64::decode(payload).map_err(|_| {
            CryptoError::invalid_request(
                "verify mac",
                &format!("invalid {}: could not decode base64", what),
                error_codes::ENVELOPE_MALFORMED,
            )
        })?;
        Ok((version, decoded))
    }
}
