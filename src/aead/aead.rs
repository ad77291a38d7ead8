use std::sync::Arc;

use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use rand::{rngs::OsRng, RngCore};

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::policy::KeyType;

/// Nonce size shared by the built-in ciphers
pub const AEAD_NONCE_SIZE: usize = 12;

/// Authentication tag appended by the built-in ciphers
pub const AEAD_TAG_SIZE: usize = 16;

/// An AEAD the engine can seal and open with.
///
/// The built-in [`AeadCipher`] covers the symmetric key types. Managed-key
/// callers implement this to hand the engine a cipher whose key never
/// leaves their keystore.
pub trait AeadProvider: Send + Sync {
    /// Required nonce length in bytes
    fn nonce_size(&self) -> usize;

    /// Bytes added to the plaintext by `seal`
    fn overhead(&self) -> usize;

    /// Encrypt and authenticate `plaintext`, returning `ciphertext || tag`.
    fn seal(&self, nonce: &[u8], plaintext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Verify and decrypt. Any failure is reported as
    /// [`CryptoError::AuthenticationFailure`].
    fn open(&self, nonce: &[u8], ciphertext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// AEAD selected by a policy's key type
///
/// # Examples
///
/// ```
/// use transit_keys::aead::{AeadCipher, AeadProvider};
/// use transit_keys::policy::KeyType;
///
/// let cipher = AeadCipher::new(KeyType::Aes256Gcm96, &[0x42; 32]).unwrap();
/// let nonce = cipher.generate_nonce();
/// let sealed = cipher.seal(&nonce, b"Secret message", b"header").unwrap();
/// let opened = cipher.open(&nonce, &sealed, b"header").unwrap();
/// assert_eq!(opened, b"Secret message");
/// ```
#[derive(Clone)]
pub enum AeadCipher {
    Aes128Gcm(Arc<Aes128Gcm>),
    Aes256Gcm(Arc<Aes256Gcm>),
    ChaCha20Poly1305(Arc<ChaCha20Poly1305>),
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AeadCipher::Aes128Gcm(_) => "AES-128-GCM",
            AeadCipher::Aes256Gcm(_) => "AES-256-GCM",
            AeadCipher::ChaCha20Poly1305(_) => "ChaCha20-Poly1305",
        };
        f.debug_tuple("AeadCipher").field(&name).finish()
    }
}

fn bad_key_length(key_type: KeyType, len: usize) -> CryptoError {
    CryptoError::internal(
        "aead init",
        &format!("invalid key length {} for {}", len, key_type),
        error_codes::ENCRYPTION_FAILED,
    )
}

impl AeadCipher {
    /// Build the cipher for `key_type` keyed with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type has no built-in AEAD or the key has the
    /// wrong length for it.
    pub fn new(key_type: KeyType, key: &[u8]) -> CryptoResult<Self> {
        match key_type {
            KeyType::Aes128Gcm96 => Aes128Gcm::new_from_slice(key)
                .map(|c| AeadCipher::Aes128Gcm(Arc::new(c)))
                .map_err(|_| bad_key_length(key_type, key.len())),
            KeyType::Aes256Gcm96 => Aes256Gcm::new_from_slice(key)
                .map(|c| AeadCipher::Aes256Gcm(Arc::new(c)))
                .map_err(|_| bad_key_length(key_type, key.len())),
            KeyType::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
                .map(|c| AeadCipher::ChaCha20Poly1305(Arc::new(c)))
                .map_err(|_| bad_key_length(key_type, key.len())),
            other => Err(CryptoError::internal(
                "aead init",
                &format!("unsupported key type {} for AEAD", other),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }

    /// Fresh random nonce from the OS generator
    pub fn generate_nonce(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; self.nonce_size()];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    fn check_nonce(&self, nonce: &[u8], operation: &str) -> CryptoResult<()> {
        if nonce.len() != self.nonce_size() {
            return Err(CryptoError::invalid_request(
                operation,
                &format!(
                    "nonce must be {} bytes, got {}",
                    self.nonce_size(),
                    nonce.len()
                ),
                error_codes::NONCE_INVALID,
            ));
        }
        Ok(())
    }
}

impl AeadProvider for AeadCipher {
    fn nonce_size(&self) -> usize {
        AEAD_NONCE_SIZE
    }

    fn overhead(&self) -> usize {
        AEAD_TAG_SIZE
    }

    fn seal(&self, nonce: &[u8], plaintext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_nonce(nonce, "aead seal")?;
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad: associated_data,
        };

        let sealed = match self {
            AeadCipher::Aes128Gcm(c) => c.encrypt(nonce, payload),
            AeadCipher::Aes256Gcm(c) => c.encrypt(nonce, payload),
            AeadCipher::ChaCha20Poly1305(c) => c.encrypt(nonce, payload),
        };
        sealed.map_err(|e| {
            CryptoError::internal(
                "aead seal",
                &format!("encryption failed: {}", e),
                error_codes::ENCRYPTION_FAILED,
            )
        })
    }

    fn open(&self, nonce: &[u8], ciphertext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_nonce(nonce, "aead open")?;
        let nonce = GenericArray::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data,
        };

        let opened = match self {
            AeadCipher::Aes128Gcm(c) => c.decrypt(nonce, payload),
            AeadCipher::Aes256Gcm(c) => c.decrypt(nonce, payload),
            AeadCipher::ChaCha20Poly1305(c) => c.decrypt(nonce, payload),
        };
        opened.map_err(|_| CryptoError::authentication_failure("decrypt"))
    }
}
