//! RSA-AES key wrapping (CKM_RSA_AES_KEY_WRAP layout).
//!
//! The blob is `RSA-OAEP(ephemeral AES-256 key) || AES-KWP(target)`,
//! base64 encoded.

use aes_kw::KekAes256;
use der::Decode;
use pkcs8::PrivateKeyInfo;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use super::key_type::{HashType, KeyType};
use super::policy::Policy;
use crate::error::{error_codes, CryptoError, CryptoResult};

const EPHEMERAL_KEY_SIZE: usize = 32;

fn wrap_error(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::invalid_request(
        "wrap key",
        &format!("failed to wrap target key for import: {}", cause),
        error_codes::WRAP_FAILED,
    )
}

fn unwrap_error(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::invalid_request(
        "unwrap key",
        &format!("failed to unwrap key: {}", cause),
        error_codes::WRAP_FAILED,
    )
}

fn wrap_for_import(wrapping_key: &RsaPublicKey, target: &[u8], hash: HashType) -> CryptoResult<String> {
    let mut ephemeral = Zeroizing::new([0u8; EPHEMERAL_KEY_SIZE]);
    OsRng.fill_bytes(&mut ephemeral[..]);

    let wrapped_ephemeral = with_digest!(hash, D => wrapping_key
        .encrypt(&mut OsRng, Oaep::new::<D>(), &ephemeral[..])
        .map_err(|e| wrap_error(format!("failed to encrypt ephemeral wrapping key with public key: {}", e))))?;

    let kek = KekAes256::from(*ephemeral);
    let wrapped_target = kek.wrap_with_padding_vec(target).map_err(wrap_error)?;

    let mut blob = wrapped_ephemeral;
    blob.extend_from_slice(&wrapped_target);
    Ok(base64::encode(blob))
}

/// Recover the target bytes from a blob produced by [`Policy::wrap_key`].
pub fn unwrap_key(rsa_private: &RsaPrivateKey, blob: &str, hash: HashType) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let raw = base64::decode(blob).map_err(unwrap_error)?;
    let split = rsa_private.size();
    if raw.len() <= split {
        return Err(unwrap_error("wrapped key is too short"));
    }
    let (wrapped_ephemeral, wrapped_target) = raw.split_at(split);

    let ephemeral = with_digest!(hash, D => rsa_private
        .decrypt(Oaep::new::<D>(), wrapped_ephemeral)
        .map_err(unwrap_error))?;
    let ephemeral = Zeroizing::new(ephemeral);
    let ephemeral: [u8; EPHEMERAL_KEY_SIZE] = ephemeral
        .as_slice()
        .try_into()
        .map_err(|_| unwrap_error("ephemeral key has the wrong length"))?;

    let kek = KekAes256::from(ephemeral);
    kek.unwrap_with_padding_vec(wrapped_target)
        .map(Zeroizing::new)
        .map_err(unwrap_error)
}

impl Policy {
    /// Wrap `target` to the RSA key of `version` (0 for latest).
    ///
    /// Symmetric targets are raw key bytes; asymmetric targets must be
    /// PKCS#8 DER.
    pub fn wrap_key(
        &self,
        version: i64,
        target: &[u8],
        target_type: KeyType,
        hash: HashType,
    ) -> CryptoResult<String> {
        if !self.key_type.signing_supported() {
            return Err(CryptoError::invalid_request(
                "wrap key",
                &format!("message signing not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let version = self.resolve_version(version, self.min_encryption_version, "key wrapping")?;
        let entry = self.entry(version)?;

        let wrapping_key = match (self.key_type.is_rsa(), entry.rsa_public_key()) {
            (true, Some(public)) => public,
            _ => {
                return Err(CryptoError::invalid_request(
                    "wrap key",
                    "unsupported key type in use; must be a rsa key",
                    error_codes::OPERATION_UNSUPPORTED,
                ))
            }
        };

        if !target_type.is_symmetric() {
            PrivateKeyInfo::from_der(target).map_err(wrap_error)?;
        }

        wrap_for_import(&wrapping_key, target, hash)
    }
}
