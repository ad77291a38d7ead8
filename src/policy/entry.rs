use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::policy::ec::Curve;
use crate::policy::KeyType;

/// One version of a policy's key.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct KeyEntry {
    /// Symmetric key bytes, or the 64-byte Ed25519 private key
    #[serde(with = "codec::bytes", default)]
    pub key: Zeroizing<Vec<u8>>,

    #[serde(with = "codec::bytes", default)]
    pub hmac_key: Zeroizing<Vec<u8>>,

    #[serde(rename = "time", default)]
    pub creation_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none", with = "codec::big_opt")]
    pub ec_x: Option<BigUint>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "codec::big_opt")]
    pub ec_y: Option<BigUint>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "codec::big_opt")]
    pub ec_d: Option<BigUint>,

    #[serde(rename = "rsa_key", default, skip_serializing_if = "Option::is_none", with = "codec::rsa_private")]
    pub rsa_private: Option<RsaPrivateKey>,

    #[serde(rename = "rsa_public_key", default, skip_serializing_if = "Option::is_none", with = "codec::rsa_public")]
    pub rsa_public: Option<RsaPublicKey>,

    /// PEM for ECDSA, base64 of the raw key for Ed25519
    #[serde(rename = "public_key", default, skip_serializing_if = "String::is_empty")]
    pub formatted_public_key: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub convergent_version: i32,

    /// Epoch seconds duplicate of `creation_time`
    #[serde(rename = "creation_time", default)]
    pub deprecated_creation_time: i64,

    #[serde(rename = "managed_key_id", default, skip_serializing_if = "String::is_empty")]
    pub managed_key_uuid: String,

    /// DER certificates, leaf first
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "codec::bytes_list")]
    pub certificate_chain: Vec<Vec<u8>>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key", &"[REDACTED]")
            .field("hmac_key", &"[REDACTED]")
            .field("creation_time", &self.creation_time)
            .field("has_ec_private", &self.ec_d.is_some())
            .field("has_rsa_private", &self.rsa_private.is_some())
            .field("formatted_public_key", &self.formatted_public_key)
            .field("convergent_version", &self.convergent_version)
            .field("managed_key_uuid", &self.managed_key_uuid)
            .field("certificate_chain_len", &self.certificate_chain.len())
            .finish()
    }
}

impl KeyEntry {
    /// Empty entry stamped with `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            creation_time: now,
            deprecated_creation_time: now.timestamp(),
            ..Default::default()
        }
    }

    /// True when no private material of any kind is present.
    pub fn is_private_key_missing(&self) -> bool {
        self.rsa_private.is_none()
            && self.ec_d.is_none()
            && self.key.is_empty()
            && self.managed_key_uuid.is_empty()
    }

    /// RSA public key, from the private key when present
    pub(crate) fn rsa_public_key(&self) -> Option<RsaPublicKey> {
        match &self.rsa_private {
            Some(private) => Some(private.to_public_key()),
            None => self.rsa_public.clone(),
        }
    }

    /// Ed25519 private key from the stored 64-byte keypair
    pub(crate) fn ed25519_signing_key(&self) -> CryptoResult<SigningKey> {
        let bytes: &[u8; 64] = self.key.as_slice().try_into().map_err(|_| {
            CryptoError::internal(
                "ed25519 key",
                "stored ed25519 key has the wrong length",
                error_codes::MISSING_KEY_MATERIAL,
            )
        })?;
        SigningKey::from_keypair_bytes(bytes).map_err(|e| {
            CryptoError::internal("ed25519 key", &e.to_string(), error_codes::MISSING_KEY_MATERIAL)
        })
    }

    /// Ed25519 public key from `formatted_public_key`
    pub(crate) fn ed25519_verifying_key(&self) -> CryptoResult<VerifyingKey> {
        let raw = base64::decode(&self.formatted_public_key)?;
        let raw: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            CryptoError::internal(
                "ed25519 key",
                "stored ed25519 public key has the wrong length",
                error_codes::MISSING_KEY_MATERIAL,
            )
        })?;
        VerifyingKey::from_bytes(&raw).map_err(|e| {
            CryptoError::internal("ed25519 key", &e.to_string(), error_codes::MISSING_KEY_MATERIAL)
        })
    }

    fn ec_public(&self) -> CryptoResult<(&BigUint, &BigUint)> {
        match (&self.ec_x, &self.ec_y) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(CryptoError::internal(
                "ec key",
                "entry has no EC public key",
                error_codes::MISSING_KEY_MATERIAL,
            )),
        }
    }

    /// PEM-encoded SubjectPublicKeyInfo for asymmetric entries.
    pub fn public_key_pem(&self, key_type: KeyType) -> CryptoResult<String> {
        if let Some(curve) = Curve::from_key_type(key_type) {
            if !self.formatted_public_key.is_empty() {
                return Ok(self.formatted_public_key.clone());
            }
            let (x, y) = self.ec_public()?;
            return curve.public_key_pem(x, y);
        }
        match key_type {
            KeyType::Ed25519 => self
                .ed25519_verifying_key()?
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| export_error(&e.to_string())),
            kt if kt.is_rsa() => self
                .rsa_public_key()
                .ok_or_else(|| export_error("entry has no RSA key"))?
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| export_error(&e.to_string())),
            other => Err(export_error(&format!("key type {} has no public key", other))),
        }
    }

    /// DER SubjectPublicKeyInfo for asymmetric entries.
    pub fn public_key_der(&self, key_type: KeyType) -> CryptoResult<Vec<u8>> {
        if let Some(curve) = Curve::from_key_type(key_type) {
            let (x, y) = self.ec_public()?;
            return curve.public_key_der(x, y);
        }
        let doc = match key_type {
            KeyType::Ed25519 => self.ed25519_verifying_key()?.to_public_key_der(),
            kt if kt.is_rsa() => self
                .rsa_public_key()
                .ok_or_else(|| export_error("entry has no RSA key"))?
                .to_public_key_der(),
            other => return Err(export_error(&format!("key type {} has no public key", other))),
        };
        doc.map(|d| d.as_bytes().to_vec())
            .map_err(|e| export_error(&e.to_string()))
    }

    /// Key material as it is wrapped for export: raw bytes for symmetric
    /// types, PKCS#8 DER otherwise.
    pub fn private_key_pkcs8_der(&self, key_type: KeyType) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if key_type.is_symmetric() {
            return Ok(self.key.clone());
        }
        if let Some(curve) = Curve::from_key_type(key_type) {
            let d = self
                .ec_d
                .as_ref()
                .ok_or_else(|| export_error("entry has no EC private key"))?;
            return curve.private_key_pkcs8(d);
        }
        let doc = match key_type {
            KeyType::Ed25519 => self.ed25519_signing_key()?.to_pkcs8_der(),
            kt if kt.is_rsa() => self
                .rsa_private
                .as_ref()
                .ok_or_else(|| export_error("entry has no RSA private key"))?
                .to_pkcs8_der(),
            other => return Err(export_error(&format!("key type {} cannot be exported", other))),
        };
        doc.map(|d| Zeroizing::new(d.as_bytes().to_vec()))
            .map_err(|e| export_error(&e.to_string()))
    }
}

fn export_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("export key", cause, error_codes::MISSING_KEY_MATERIAL)
}

/// When and at which version a policy was last backed up or restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub time: DateTime<Utc>,
    pub version: i64,
}

pub type RestoreInfo = BackupInfo;

/// Stored archive document. Index `i` holds version
/// `i + archive_min_version`; index 0 is a placeholder while the archive
/// still starts at version 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchivedKeys {
    #[serde(default, deserialize_with = "codec::null_as_default")]
    pub keys: Vec<KeyEntry>,
}

/// Backup blob payload
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyData {
    pub policy: crate::policy::Policy,
    pub archived_keys: ArchivedKeys,
}

/// Serde adapters for the stored JSON layout.
pub(crate) mod codec {
    use std::str::FromStr;

    use rsa::traits::{PrivateKeyParts, PublicKeyParts};
    use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// A big integer written as a bare JSON number of any length
    pub struct JsonBig(pub BigUint);

    impl Serialize for JsonBig {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let number = serde_json::Number::from_str(&self.0.to_str_radix(10)).map_err(S::Error::custom)?;
            number.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for JsonBig {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let number = serde_json::Number::deserialize(deserializer)?;
            BigUint::parse_bytes(number.to_string().as_bytes(), 10)
                .map(JsonBig)
                .ok_or_else(|| D::Error::custom(format!("invalid big integer {}", number)))
        }
    }

    pub mod big_opt {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<BigUint>, serializer: S) -> Result<S::Ok, S::Error> {
            value.as_ref().map(|v| JsonBig(v.clone())).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<BigUint>, D::Error> {
            Ok(Option::<JsonBig>::deserialize(deserializer)?.map(|b| b.0))
        }
    }

    #[derive(Serialize, Deserialize)]
    #[allow(non_snake_case)]
    struct RsaPrivateJson {
        N: JsonBig,
        E: JsonBig,
        D: JsonBig,
        Primes: Vec<JsonBig>,
    }

    #[derive(Serialize, Deserialize)]
    #[allow(non_snake_case)]
    struct RsaPublicJson {
        N: JsonBig,
        E: JsonBig,
    }

    pub mod rsa_private {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<RsaPrivateKey>, serializer: S) -> Result<S::Ok, S::Error> {
            value
                .as_ref()
                .map(|key| RsaPrivateJson {
                    N: JsonBig(key.n().clone()),
                    E: JsonBig(key.e().clone()),
                    D: JsonBig(key.d().clone()),
                    Primes: key.primes().iter().cloned().map(JsonBig).collect(),
                })
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RsaPrivateKey>, D::Error> {
            let Some(json) = Option::<RsaPrivateJson>::deserialize(deserializer)? else {
                return Ok(None);
            };
            let mut key = RsaPrivateKey::from_components(
                json.N.0,
                json.E.0,
                json.D.0,
                json.Primes.into_iter().map(|p| p.0).collect(),
            )
            .map_err(D::Error::custom)?;
            key.precompute().map_err(D::Error::custom)?;
            Ok(Some(key))
        }
    }

    pub mod rsa_public {
        use super::*;

        pub fn serialize<S: Serializer>(value: &Option<RsaPublicKey>, serializer: S) -> Result<S::Ok, S::Error> {
            value
                .as_ref()
                .map(|key| RsaPublicJson {
                    N: JsonBig(key.n().clone()),
                    E: JsonBig(key.e().clone()),
                })
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<RsaPublicKey>, D::Error> {
            match Option::<RsaPublicJson>::deserialize(deserializer)? {
                Some(json) => RsaPublicKey::new(json.N.0, json.E.0)
                    .map(Some)
                    .map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }

    /// Standard base64, with `null` for an empty value
    pub mod bytes {
        use super::*;

        pub fn serialize<S, T>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
            T: AsRef<[u8]>,
        {
            let value = value.as_ref();
            if value.is_empty() {
                serializer.serialize_none()
            } else {
                serializer.serialize_str(&base64::encode(value))
            }
        }

        pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
        where
            D: Deserializer<'de>,
            T: From<Vec<u8>>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(encoded) => base64::decode(encoded)
                    .map(T::from)
                    .map_err(D::Error::custom),
                None => Ok(T::from(Vec::new())),
            }
        }
    }

    pub mod bytes_list {
        use super::*;

        pub fn serialize<S: Serializer>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
            value
                .iter()
                .map(base64::encode)
                .collect::<Vec<_>>()
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
            Option::<Vec<String>>::deserialize(deserializer)?
                .unwrap_or_default()
                .into_iter()
                .map(|s| base64::decode(s).map_err(D::Error::custom))
                .collect()
        }
    }

    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// `std::time::Duration` as integer nanoseconds
    pub mod duration_nanos {
        use super::*;
        use std::time::Duration;

        pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
            let nanos = i64::try_from(value.as_nanos()).map_err(S::Error::custom)?;
            serializer.serialize_i64(nanos)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
            let nanos = i64::deserialize(deserializer)?;
            u64::try_from(nanos)
                .map(Duration::from_nanos)
                .map_err(|_| D::Error::custom("auto rotate period cannot be negative"))
        }
    }
}
