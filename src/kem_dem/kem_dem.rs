use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use oqs::kem::{Algorithm, Kem};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE};
use crate::error::{error_codes, CryptoError, CryptoResult};

/// HKDF info string binding the derived key to this construction
pub const KEM_DEM_INFO: &[u8] = "Kyber→AES-256-GCM key".as_bytes();

/// AES-256 key length derived from the shared secret
pub const KEM_DEM_KEY_SIZE: usize = 32;

/// Output of [`encrypt`]: everything the recipient needs besides their
/// secret key and the associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemDemCiphertext {
    /// Kyber768 encapsulation of the shared secret
    pub capsule: Vec<u8>,
    pub nonce: Vec<u8>,
    /// AES-256-GCM ciphertext with the tag appended
    pub ciphertext: Vec<u8>,
}

/// Kyber768 key pair. The secret half is wiped on drop.
pub struct KemDemKeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for KemDemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KemDemKeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn kyber768(operation: &str) -> CryptoResult<Kem> {
    Kem::new(Algorithm::Kyber768).map_err(|e| {
        CryptoError::internal(
            operation,
            &format!("failed to initialize Kyber768: {}", e),
            error_codes::KEM_ENCAPSULATION_FAILED,
        )
    })
}

fn derive_cipher(shared_secret: &[u8], operation: &str) -> CryptoResult<Aes256Gcm> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = Zeroizing::new([0u8; KEM_DEM_KEY_SIZE]);
    hkdf.expand(KEM_DEM_INFO, &mut key[..]).map_err(|_| {
        CryptoError::internal(
            operation,
            "HKDF expansion of shared secret failed",
            error_codes::DERIVATION_FAILED,
        )
    })?;
    Aes256Gcm::new_from_slice(&key[..]).map_err(|_| {
        CryptoError::internal(operation, "invalid AES-256 key length", error_codes::ENCRYPTION_FAILED)
    })
}

/// Generate a fresh Kyber768 key pair.
pub fn generate_keypair() -> CryptoResult<KemDemKeyPair> {
    let kem = kyber768("generate key pair")?;
    let (pk, sk) = kem.keypair().map_err(|e| {
        CryptoError::internal(
            "generate key pair",
            &e.to_string(),
            error_codes::POLICY_KEY_GENERATION_FAILED,
        )
    })?;
    Ok(KemDemKeyPair {
        public_key: pk.into_vec(),
        secret_key: Zeroizing::new(sk.into_vec()),
    })
}

/// Encrypt `plaintext` to the holder of the Kyber768 secret key matching
/// `public_key`, authenticating `associated_data`.
///
/// # Errors
///
/// Returns `InvalidRequest` if `public_key` is not a Kyber768 public key.
///
/// # Examples
///
/// ```
/// use transit_keys::kem_dem;
///
/// let pair = kem_dem::generate_keypair().unwrap();
/// let sealed = kem_dem::encrypt(&pair.public_key, b"attack at dawn", b"ctx").unwrap();
/// let opened = kem_dem::decrypt(&pair.secret_key, &sealed, b"ctx").unwrap();
/// assert_eq!(opened, b"attack at dawn");
/// ```
pub fn encrypt(
    public_key: &[u8],
    plaintext: &[u8],
    associated_data: &[u8],
) -> CryptoResult<KemDemCiphertext> {
    let kem = kyber768("kem-dem encrypt")?;
    let pk = kem.public_key_from_bytes(public_key).ok_or_else(|| {
        CryptoError::invalid_request(
            "kem-dem encrypt",
            &format!(
                "public key must be {} bytes, got {}",
                kem.length_public_key(),
                public_key.len()
            ),
            error_codes::KEM_ENCAPSULATION_FAILED,
        )
    })?;
    let (capsule, shared_secret) = kem.encapsulate(&pk).map_err(|e| {
        CryptoError::internal(
            "kem-dem encrypt",
            &e.to_string(),
            error_codes::KEM_ENCAPSULATION_FAILED,
        )
    })?;
    let shared_secret = Zeroizing::new(shared_secret.into_vec());

    let cipher = derive_cipher(&shared_secret, "kem-dem encrypt")?;
    let mut nonce = vec![0u8; AEAD_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let payload = Payload {
        msg: plaintext,
        aad: associated_data,
    };
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), payload)
        .map_err(|_| {
            CryptoError::internal("kem-dem encrypt", "AES-GCM seal failed", error_codes::ENCRYPTION_FAILED)
        })?;

    Ok(KemDemCiphertext {
        capsule: capsule.into_vec(),
        nonce,
        ciphertext,
    })
}

/// Reverse [`encrypt`].
///
/// A malformed capsule, a nonce of the wrong length, a ciphertext shorter
/// than the tag, the wrong secret key and mismatched associated data all
/// surface as [`CryptoError::AuthenticationFailure`].
pub fn decrypt(
    secret_key: &[u8],
    sealed: &KemDemCiphertext,
    associated_data: &[u8],
) -> CryptoResult<Vec<u8>> {
    const OP: &str = "kem-dem decrypt";
    let rejected = |error_code| CryptoError::AuthenticationFailure {
        operation: OP.to_string(),
        error_code,
    };

    let kem = kyber768(OP)?;
    let sk = kem.secret_key_from_bytes(secret_key).ok_or_else(|| {
        CryptoError::invalid_request(
            OP,
            &format!(
                "secret key must be {} bytes, got {}",
                kem.length_secret_key(),
                secret_key.len()
            ),
            error_codes::KEM_DECAPSULATION_FAILED,
        )
    })?;
    let capsule = kem
        .ciphertext_from_bytes(&sealed.capsule)
        .ok_or_else(|| rejected(error_codes::KEM_CAPSULE_INVALID))?;
    if sealed.nonce.len() != AEAD_NONCE_SIZE || sealed.ciphertext.len() < AEAD_TAG_SIZE {
        return Err(rejected(error_codes::DECRYPTION_FAILED));
    }

    // Kyber rejects implicitly: a corrupted capsule yields an unrelated
    // secret and the tag check below fails.
    let shared_secret = kem
        .decapsulate(&sk, &capsule)
        .map_err(|_| rejected(error_codes::KEM_DECAPSULATION_FAILED))?;
    let shared_secret = Zeroizing::new(shared_secret.into_vec());

    let cipher = derive_cipher(&shared_secret, OP)?;
    let payload = Payload {
        msg: &sealed.ciphertext,
        aad: associated_data,
    };
    cipher
        .decrypt(GenericArray::from_slice(&sealed.nonce), payload)
        .map_err(|_| rejected(error_codes::DECRYPTION_FAILED))
}
