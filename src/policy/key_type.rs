use std::fmt;
use std::str::FromStr;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Digest;

use crate::error::{error_codes, CryptoError, CryptoResult};

/// Smallest HMAC key a policy accepts, in bytes
pub const HMAC_MIN_KEY_SIZE: usize = 256 / 8;
/// Largest HMAC key a policy accepts, in bytes
pub const HMAC_MAX_KEY_SIZE: usize = 4096 / 8;
/// HMAC key length used when a new policy does not ask for one
pub const HMAC_DEFAULT_KEY_SIZE: usize = HMAC_MIN_KEY_SIZE;

/// Template used when a policy does not set one
pub const DEFAULT_VERSION_TEMPLATE: &str = "vault:v{{version}}:";

/// Convergent nonce scheme stamped on newly rotated entries
pub const CURRENT_CONVERGENT_VERSION: i32 = 3;

/// Algorithm of a policy. The integer tags are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyType {
    #[default]
    Aes256Gcm96,
    EcdsaP256,
    Ed25519,
    Rsa2048,
    Rsa4096,
    ChaCha20Poly1305,
    EcdsaP384,
    EcdsaP521,
    Aes128Gcm96,
    Rsa3072,
    ManagedKey,
    Hmac,
    Aes128Cmac,
    Aes256Cmac,
}

const ALL_KEY_TYPES: [KeyType; 14] = [
    KeyType::Aes256Gcm96,
    KeyType::EcdsaP256,
    KeyType::Ed25519,
    KeyType::Rsa2048,
    KeyType::Rsa4096,
    KeyType::ChaCha20Poly1305,
    KeyType::EcdsaP384,
    KeyType::EcdsaP521,
    KeyType::Aes128Gcm96,
    KeyType::Rsa3072,
    KeyType::ManagedKey,
    KeyType::Hmac,
    KeyType::Aes128Cmac,
    KeyType::Aes256Cmac,
];

impl KeyType {
    pub fn all() -> &'static [KeyType] {
        &ALL_KEY_TYPES
    }

    /// On-disk integer tag
    pub fn tag(self) -> i64 {
        match self {
            KeyType::Aes256Gcm96 => 0,
            KeyType::EcdsaP256 => 1,
            KeyType::Ed25519 => 2,
            KeyType::Rsa2048 => 3,
            KeyType::Rsa4096 => 4,
            KeyType::ChaCha20Poly1305 => 5,
            KeyType::EcdsaP384 => 6,
            KeyType::EcdsaP521 => 7,
            KeyType::Aes128Gcm96 => 8,
            KeyType::Rsa3072 => 9,
            KeyType::ManagedKey => 10,
            KeyType::Hmac => 11,
            KeyType::Aes128Cmac => 12,
            KeyType::Aes256Cmac => 13,
        }
    }

    pub fn from_tag(tag: i64) -> Option<Self> {
        ALL_KEY_TYPES.iter().copied().find(|kt| kt.tag() == tag)
    }

    pub fn encryption_supported(self) -> bool {
        matches!(
            self,
            KeyType::Aes128Gcm96
                | KeyType::Aes256Gcm96
                | KeyType::ChaCha20Poly1305
                | KeyType::Rsa2048
                | KeyType::Rsa3072
                | KeyType::Rsa4096
                | KeyType::ManagedKey
        )
    }

    pub fn decryption_supported(self) -> bool {
        self.encryption_supported()
    }

    pub fn signing_supported(self) -> bool {
        self.is_ecdsa() || self.is_rsa() || matches!(self, KeyType::Ed25519 | KeyType::ManagedKey)
    }

    /// Whether signing expects the caller to hash the input first
    pub fn hash_signature_input(self) -> bool {
        self.is_ecdsa() || self.is_rsa() || self == KeyType::ManagedKey
    }

    pub fn derivation_supported(self) -> bool {
        matches!(
            self,
            KeyType::Aes128Gcm96 | KeyType::Aes256Gcm96 | KeyType::ChaCha20Poly1305 | KeyType::Ed25519
        )
    }

    pub fn associated_data_supported(self) -> bool {
        matches!(
            self,
            KeyType::Aes128Gcm96 | KeyType::Aes256Gcm96 | KeyType::ChaCha20Poly1305 | KeyType::ManagedKey
        )
    }

    pub fn cmac_supported(self) -> bool {
        matches!(self, KeyType::Aes128Cmac | KeyType::Aes256Cmac)
    }

    pub fn hmac_supported(self) -> bool {
        !self.cmac_supported() && self != KeyType::ManagedKey
    }

    pub fn import_public_key_supported(self) -> bool {
        self.is_ecdsa() || self.is_rsa() || self == KeyType::Ed25519
    }

    pub fn padding_schemes_supported(self) -> bool {
        self.is_rsa()
    }

    pub fn is_ecdsa(self) -> bool {
        matches!(self, KeyType::EcdsaP256 | KeyType::EcdsaP384 | KeyType::EcdsaP521)
    }

    pub fn is_rsa(self) -> bool {
        matches!(self, KeyType::Rsa2048 | KeyType::Rsa3072 | KeyType::Rsa4096)
    }

    /// Types whose key material is a plain byte string
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            KeyType::Aes128Gcm96
                | KeyType::Aes256Gcm96
                | KeyType::ChaCha20Poly1305
                | KeyType::Hmac
                | KeyType::Aes128Cmac
                | KeyType::Aes256Cmac
        )
    }

    pub fn is_aead(self) -> bool {
        matches!(
            self,
            KeyType::Aes128Gcm96 | KeyType::Aes256Gcm96 | KeyType::ChaCha20Poly1305
        )
    }

    /// Modulus size for RSA types
    pub fn rsa_bits(self) -> Option<usize> {
        match self {
            KeyType::Rsa2048 => Some(2048),
            KeyType::Rsa3072 => Some(3072),
            KeyType::Rsa4096 => Some(4096),
            _ => None,
        }
    }

    /// Fixed symmetric key length, if the type has one
    pub fn symmetric_key_size(self) -> Option<usize> {
        match self {
            KeyType::Aes128Gcm96 | KeyType::Aes128Cmac => Some(16),
            KeyType::Aes256Gcm96 | KeyType::ChaCha20Poly1305 | KeyType::Aes256Cmac => Some(32),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Aes128Gcm96 => "aes128-gcm96",
            KeyType::Aes256Gcm96 => "aes256-gcm96",
            KeyType::ChaCha20Poly1305 => "chacha20-poly1305",
            KeyType::EcdsaP256 => "ecdsa-p256",
            KeyType::EcdsaP384 => "ecdsa-p384",
            KeyType::EcdsaP521 => "ecdsa-p521",
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa2048 => "rsa-2048",
            KeyType::Rsa3072 => "rsa-3072",
            KeyType::Rsa4096 => "rsa-4096",
            KeyType::Hmac => "hmac",
            KeyType::ManagedKey => "managed_key",
            KeyType::Aes128Cmac => "aes128-cmac",
            KeyType::Aes256Cmac => "aes256-cmac",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_KEY_TYPES
            .iter()
            .copied()
            .find(|kt| kt.as_str() == s)
            .ok_or_else(|| {
                CryptoError::invalid_request(
                    "parse key type",
                    &format!("unknown key type {}", s),
                    error_codes::OPERATION_UNSUPPORTED,
                )
            })
    }
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.tag())
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = i64::deserialize(deserializer)?;
        KeyType::from_tag(tag).ok_or_else(|| D::Error::custom(format!("unknown key type tag {}", tag)))
    }
}

/// Key derivation function of a derived policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kdf {
    /// The legacy single-shot counter KDF over HMAC-SHA256
    #[default]
    HmacSha256Counter,
    HkdfSha256,
}

impl Kdf {
    pub fn tag(self) -> i64 {
        match self {
            Kdf::HmacSha256Counter => 0,
            Kdf::HkdfSha256 => 1,
        }
    }
}

impl Serialize for Kdf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.tag())
    }
}

impl<'de> Deserialize<'de> for Kdf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i64::deserialize(deserializer)? {
            0 => Ok(Kdf::HmacSha256Counter),
            1 => Ok(Kdf::HkdfSha256),
            other => Err(D::Error::custom(format!("unknown kdf {}", other))),
        }
    }
}

/// Hash applied to signature and HMAC input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashType {
    None,
    Sha1,
    Sha2_224,
    #[default]
    Sha2_256,
    Sha2_384,
    Sha2_512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

const ALL_HASH_TYPES: [HashType; 10] = [
    HashType::None,
    HashType::Sha1,
    HashType::Sha2_224,
    HashType::Sha2_256,
    HashType::Sha2_384,
    HashType::Sha2_512,
    HashType::Sha3_224,
    HashType::Sha3_256,
    HashType::Sha3_384,
    HashType::Sha3_512,
];

impl HashType {
    pub fn tag(self) -> i64 {
        match self {
            HashType::None => 0,
            HashType::Sha1 => 1,
            HashType::Sha2_224 => 2,
            HashType::Sha2_256 => 3,
            HashType::Sha2_384 => 4,
            HashType::Sha2_512 => 5,
            HashType::Sha3_224 => 6,
            HashType::Sha3_256 => 7,
            HashType::Sha3_384 => 8,
            HashType::Sha3_512 => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HashType::None => "none",
            HashType::Sha1 => "sha1",
            HashType::Sha2_224 => "sha2-224",
            HashType::Sha2_256 => "sha2-256",
            HashType::Sha2_384 => "sha2-384",
            HashType::Sha2_512 => "sha2-512",
            HashType::Sha3_224 => "sha3-224",
            HashType::Sha3_256 => "sha3-256",
            HashType::Sha3_384 => "sha3-384",
            HashType::Sha3_512 => "sha3-512",
        }
    }

    /// Digest size in bytes. `None` has no digest.
    pub fn size(self) -> usize {
        match self {
            HashType::None => 0,
            HashType::Sha1 => 20,
            HashType::Sha2_224 | HashType::Sha3_224 => 28,
            HashType::Sha2_256 | HashType::Sha3_256 => 32,
            HashType::Sha2_384 | HashType::Sha3_384 => 48,
            HashType::Sha2_512 | HashType::Sha3_512 => 64,
        }
    }

    /// Hash `input`. `None` returns the input unchanged.
    pub fn digest(self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(match self {
            HashType::None => input.to_vec(),
            HashType::Sha1 => return Err(unsupported_hash(self)),
            HashType::Sha2_224 => sha2::Sha224::digest(input).to_vec(),
            HashType::Sha2_256 => sha2::Sha256::digest(input).to_vec(),
            HashType::Sha2_384 => sha2::Sha384::digest(input).to_vec(),
            HashType::Sha2_512 => sha2::Sha512::digest(input).to_vec(),
            HashType::Sha3_224 => sha3::Sha3_224::digest(input).to_vec(),
            HashType::Sha3_256 => sha3::Sha3_256::digest(input).to_vec(),
            HashType::Sha3_384 => sha3::Sha3_384::digest(input).to_vec(),
            HashType::Sha3_512 => sha3::Sha3_512::digest(input).to_vec(),
        })
    }
}

pub(crate) fn unsupported_hash(hash: HashType) -> CryptoError {
    CryptoError::invalid_request(
        "hash",
        &format!("unsupported hash algorithm {}", hash),
        error_codes::OPERATION_UNSUPPORTED,
    )
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_HASH_TYPES
            .iter()
            .copied()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| {
                CryptoError::invalid_request(
                    "parse hash type",
                    &format!("unknown hash algorithm {}", s),
                    error_codes::OPERATION_UNSUPPORTED,
                )
            })
    }
}

/// Wire format of ECDSA signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarshalingType {
    /// DER `SEQUENCE { r, s }`, standard base64
    #[default]
    Asn1,
    /// Fixed-width `r || s`, unpadded URL-safe base64
    Jws,
}

impl MarshalingType {
    pub fn tag(self) -> i64 {
        match self {
            MarshalingType::Asn1 => 1,
            MarshalingType::Jws => 2,
        }
    }

    pub(crate) fn encode(self, bytes: &[u8]) -> String {
        match self {
            MarshalingType::Asn1 => base64::encode(bytes),
            MarshalingType::Jws => base64::encode_config(bytes, base64::URL_SAFE_NO_PAD),
        }
    }

    pub(crate) fn decode(self, encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
        match self {
            MarshalingType::Asn1 => base64::decode(encoded),
            MarshalingType::Jws => base64::decode_config(encoded, base64::URL_SAFE_NO_PAD),
        }
    }
}

impl FromStr for MarshalingType {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asn1" => Ok(MarshalingType::Asn1),
            "jws" => Ok(MarshalingType::Jws),
            _ => Err(CryptoError::invalid_request(
                "parse marshaling type",
                &format!("unknown marshaling type {}", s),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }
}

/// RSA encryption padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingScheme {
    /// OAEP with SHA-256 and an empty label
    #[default]
    Oaep,
    Pkcs1v15,
}

impl PaddingScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            PaddingScheme::Oaep => "oaep",
            PaddingScheme::Pkcs1v15 => "pkcs1v15",
        }
    }
}

impl fmt::Display for PaddingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaddingScheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oaep" => Ok(PaddingScheme::Oaep),
            "pkcs1v15" => Ok(PaddingScheme::Pkcs1v15),
            _ => Err(CryptoError::invalid_request(
                "parse padding scheme",
                &format!("unknown padding scheme: {}", s),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }
}

/// RSA signature scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    #[default]
    Pss,
    Pkcs1v15,
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    /// An empty string selects PSS.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "pss" => Ok(SignatureAlgorithm::Pss),
            "pkcs1v15" => Ok(SignatureAlgorithm::Pkcs1v15),
            _ => Err(CryptoError::internal(
                "parse signature algorithm",
                &format!("unsupported rsa signature algorithm {}", s),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }
}

/// PSS salt length selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaltLength {
    /// Sign with the longest salt that fits; detect the length on verify
    #[default]
    Auto,
    EqualsHash,
    Explicit(usize),
}

impl SaltLength {
    /// Parse the integer convention where 0 is auto and -1 equals-hash.
    pub fn from_i64(value: i64) -> CryptoResult<Self> {
        match value {
            0 => Ok(SaltLength::Auto),
            -1 => Ok(SaltLength::EqualsHash),
            n if n > 0 => Ok(SaltLength::Explicit(n as usize)),
            n => Err(CryptoError::invalid_request(
                "parse salt length",
                &format!("requested salt length {} is invalid", n),
                error_codes::SALT_LENGTH_INVALID,
            )),
        }
    }
}

impl FromStr for SaltLength {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SaltLength::Auto),
            "hash" => Ok(SaltLength::EqualsHash),
            other => {
                let n: i64 = other.parse().map_err(|_| {
                    CryptoError::invalid_request(
                        "parse salt length",
                        &format!("salt length {} is neither auto, hash nor a number", other),
                        error_codes::SALT_LENGTH_INVALID,
                    )
                })?;
                SaltLength::from_i64(n)
            }
        }
    }
}
