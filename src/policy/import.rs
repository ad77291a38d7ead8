use chrono::Utc;
use der::asn1::ObjectIdentifier;
use der::Decode;
use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::PrivateKeyInfo;
use rand_core::CryptoRngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use spki::SubjectPublicKeyInfoRef;
use zeroize::Zeroizing;

use super::ec::{Curve, EcKeyParts};
use super::entry::KeyEntry;
use super::key_type::{KeyType, HMAC_MAX_KEY_SIZE, HMAC_MIN_KEY_SIZE};
use super::policy::{random_bytes, Policy};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::pkcs8_ed25519::parse_pkcs8_ed25519_private_key;
use crate::storage::Storage;

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Asymmetric key material as it arrives from an import
enum ParsedKey {
    Ec(Curve, EcKeyParts),
    Ed25519Private(SigningKey),
    Ed25519Public(VerifyingKey),
    RsaPrivate(RsaPrivateKey),
    RsaPublic(RsaPublicKey),
}

impl ParsedKey {
    fn describe(&self) -> &'static str {
        match self {
            ParsedKey::Ec(_, parts) if parts.d.is_some() => "ECDSA private key",
            ParsedKey::Ec(..) => "ECDSA public key",
            ParsedKey::Ed25519Private(_) => "Ed25519 private key",
            ParsedKey::Ed25519Public(_) => "Ed25519 public key",
            ParsedKey::RsaPrivate(_) => "RSA private key",
            ParsedKey::RsaPublic(_) => "RSA public key",
        }
    }
}

fn import_error(cause: &str, code: u32) -> CryptoError {
    CryptoError::invalid_request("import key", cause, code)
}

fn parse_error(cause: impl std::fmt::Display) -> CryptoError {
    import_error(&cause.to_string(), error_codes::IMPORT_PARSE_FAILED)
}

fn parse_standard_private_key(der: &[u8]) -> CryptoResult<ParsedKey> {
    let info = PrivateKeyInfo::from_der(der).map_err(parse_error)?;
    let oid = info.algorithm.oid;

    if oid == OID_RSA_ENCRYPTION {
        let private = RsaPrivateKey::from_pkcs8_der(der).map_err(parse_error)?;
        return Ok(ParsedKey::RsaPrivate(private));
    }
    if oid == OID_EC_PUBLIC_KEY {
        let curve_oid = info.algorithm.parameters_oid().map_err(parse_error)?;
        let curve = Curve::from_oid(&curve_oid)
            .ok_or_else(|| parse_error(format!("unknown elliptic curve {}", curve_oid)))?;
        return Ok(ParsedKey::Ec(curve, curve.parse_pkcs8(der)?));
    }
    if oid == OID_ED25519 {
        let signing = SigningKey::from_pkcs8_der(der).map_err(parse_error)?;
        return Ok(ParsedKey::Ed25519Private(signing));
    }
    Err(parse_error(format!("unknown private key algorithm {}", oid)))
}

/// PKCS#8 DER private key, falling back to the legacy Ed25519 layouts.
fn parse_private_key(der: &[u8]) -> CryptoResult<ParsedKey> {
    match parse_standard_private_key(der) {
        Ok(parsed) => Ok(parsed),
        Err(original) => match parse_pkcs8_ed25519_private_key(der) {
            Ok(signing) => Ok(ParsedKey::Ed25519Private(signing)),
            Err(legacy) => Err(parse_error(format!(
                "error parsing asymmetric key: {}; as a legacy ed25519 key: {}",
                original, legacy
            ))),
        },
    }
}

/// PEM SubjectPublicKeyInfo
fn parse_public_key(pem: &[u8]) -> CryptoResult<ParsedKey> {
    let text = std::str::from_utf8(pem)
        .ok()
        .filter(|text| text.contains("-----BEGIN"))
        .ok_or_else(|| parse_error("error parsing public key: not in PEM format"))?;
    let (_, der) = der::pem::decode_vec(text.as_bytes())
        .map_err(|e| parse_error(format!("error parsing public key: {}", e)))?;
    let spki = SubjectPublicKeyInfoRef::from_der(&der)
        .map_err(|e| parse_error(format!("error parsing public key: {}", e)))?;

    let oid = spki.algorithm.oid;
    if oid == OID_RSA_ENCRYPTION {
        let public = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| parse_error(format!("error parsing public key: {}", e)))?;
        return Ok(ParsedKey::RsaPublic(public));
    }
    if oid == OID_EC_PUBLIC_KEY {
        let curve_oid = spki
            .algorithm
            .parameters_oid()
            .map_err(|e| parse_error(format!("error parsing public key: {}", e)))?;
        let curve = Curve::from_oid(&curve_oid)
            .ok_or_else(|| parse_error(format!("error parsing public key: unknown elliptic curve {}", curve_oid)))?;
        return Ok(ParsedKey::Ec(curve, curve.parse_spki(&der)?));
    }
    if oid == OID_ED25519 {
        let public = VerifyingKey::from_public_key_der(&der)
            .map_err(|e| parse_error(format!("error parsing public key: {}", e)))?;
        return Ok(ParsedKey::Ed25519Public(public));
    }
    Err(parse_error(format!("error parsing public key: unknown algorithm {}", oid)))
}

/// Fill `entry` from parsed material after checking it fits `key_type`.
fn fill_entry(entry: &mut KeyEntry, key_type: KeyType, parsed: ParsedKey) -> CryptoResult<()> {
    let wrong_type = |parsed: &ParsedKey| {
        import_error(
            &format!("invalid key type: expected {}, got {}", key_type, parsed.describe()),
            error_codes::IMPORT_KEY_TYPE_MISMATCH,
        )
    };

    match key_type {
        kt if kt.is_ecdsa() => {
            let expected = Curve::from_key_type(kt).ok_or_else(|| wrong_type(&parsed))?;
            let (curve, parts) = match parsed {
                ParsedKey::Ec(curve, parts) => (curve, parts),
                other => return Err(wrong_type(&other)),
            };
            if curve != expected {
                return Err(import_error(
                    &format!("invalid curve: expected {}, got {}", expected.name(), curve.name()),
                    error_codes::IMPORT_KEY_TYPE_MISMATCH,
                ));
            }
            entry.formatted_public_key = curve.public_key_pem(&parts.x, &parts.y)?;
            entry.ec_d = parts.d;
            entry.ec_x = Some(parts.x);
            entry.ec_y = Some(parts.y);
        }
        KeyType::Ed25519 => match parsed {
            ParsedKey::Ed25519Private(signing) => {
                entry.key = Zeroizing::new(signing.to_keypair_bytes().to_vec());
                entry.formatted_public_key = base64::encode(signing.verifying_key().as_bytes());
            }
            ParsedKey::Ed25519Public(public) => {
                entry.formatted_public_key = base64::encode(public.as_bytes());
            }
            other => return Err(wrong_type(&other)),
        },
        kt if kt.is_rsa() => {
            let expected = kt.rsa_bits().unwrap_or(2048) / 8;
            let (private, public) = match parsed {
                ParsedKey::RsaPrivate(private) => {
                    let public = private.to_public_key();
                    (Some(private), public)
                }
                ParsedKey::RsaPublic(public) => (None, public),
                other => return Err(wrong_type(&other)),
            };
            if public.size() != expected {
                return Err(import_error(
                    &format!(
                        "invalid key size: expected {} bytes, got {} bytes",
                        expected,
                        public.size()
                    ),
                    error_codes::IMPORT_KEY_SIZE_INVALID,
                ));
            }
            entry.rsa_private = private;
            entry.rsa_public = Some(public);
        }
        other => {
            return Err(import_error(
                &format!("key type {} does not hold asymmetric keys", other),
                error_codes::OPERATION_UNSUPPORTED,
            ))
        }
    }
    Ok(())
}

fn symmetric_size_ok(key_type: KeyType, len: usize) -> bool {
    match key_type {
        KeyType::Hmac => (HMAC_MIN_KEY_SIZE..=HMAC_MAX_KEY_SIZE).contains(&len),
        kt => kt.symmetric_key_size().map_or(true, |size| size == len),
    }
}

impl Policy {
    /// Import private key material as a new version.
    pub fn import<R: CryptoRngCore>(
        &mut self,
        storage: &dyn Storage,
        key: &[u8],
        rng: &mut R,
    ) -> CryptoResult<()> {
        self.import_public_or_private(storage, key, true, rng)
    }

    /// Import raw symmetric bytes, a PKCS#8 DER private key or a PEM public
    /// key.
    ///
    /// When the latest version holds only a public key and `key` is its
    /// private half, the private key is folded into that version instead of
    /// appending a new one.
    pub fn import_public_or_private<R: CryptoRngCore>(
        &mut self,
        storage: &dyn Storage,
        key: &[u8],
        is_private_key: bool,
        rng: &mut R,
    ) -> CryptoResult<()> {
        if self.latest_version > 0 && is_private_key {
            let latest_incomplete = self
                .keys
                .get(&self.latest_version)
                .is_some_and(KeyEntry::is_private_key_missing);
            if latest_incomplete
                && self
                    .import_private_key_for_version(storage, self.latest_version, key)
                    .is_ok()
            {
                return Ok(());
            }
        }

        if self.key_type == KeyType::ManagedKey {
            return Err(import_error(
                "managed keys are created through their key system",
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let mut entry = KeyEntry::new(Utc::now());
        if self.key_type != KeyType::Hmac {
            entry.hmac_key = random_bytes(rng, 32);
        }

        if self.key_type == KeyType::Ed25519 && self.derived && !is_private_key {
            return Err(import_error(
                "unable to import only public key for derived Ed25519 key: imported key should not be an Ed25519 key pair but is instead an HKDF key",
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let prior_key_size = self.key_size;
        if self.key_type.is_symmetric() {
            if !symmetric_size_ok(self.key_type, key.len()) {
                return Err(import_error(
                    &format!("invalid key size {} bytes for key type {}", key.len(), self.key_type),
                    error_codes::IMPORT_KEY_SIZE_INVALID,
                ));
            }
            entry.key = Zeroizing::new(key.to_vec());
            if self.key_type == KeyType::Hmac {
                self.key_size = key.len();
                entry.hmac_key = entry.key.clone();
            }
        } else {
            let parsed = if is_private_key {
                parse_private_key(key)?
            } else {
                parse_public_key(key)?
            };
            fill_entry(&mut entry, self.key_type, parsed)?;
        }

        let prior_latest_version = self.latest_version;
        let prior_min_decryption_version = self.min_decryption_version;
        let prior_imported = self.imported;
        let prior_keys = self.keys.clone();

        self.append_version(entry);
        self.imported = true;

        if let Err(err) = self.persist(storage) {
            self.latest_version = prior_latest_version;
            self.min_decryption_version = prior_min_decryption_version;
            self.imported = prior_imported;
            self.key_size = prior_key_size;
            self.keys = prior_keys;
            return Err(err);
        }

        log::info!(
            "imported {} key into policy {} as version {}",
            if is_private_key { "private" } else { "public" },
            self.name,
            self.latest_version
        );
        Ok(())
    }

    /// Whether `version` may still receive imported material.
    pub fn key_version_can_be_updated(&self, version: i64, is_private_key: bool) -> CryptoResult<()> {
        let entry = self.entry(version)?;

        if !self.key_type.import_public_key_supported() {
            return Err(import_error(
                "provided type does not support importing key versions",
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let private_missing = entry.is_private_key_missing();
        if private_missing && !is_private_key {
            return Err(import_error(
                "cannot add a public key to a key version that already has a public key set",
                error_codes::IMPORT_KEY_PAIR_MISMATCH,
            ));
        }
        if !private_missing {
            return Err(import_error(
                "private key imported, key version cannot be updated",
                error_codes::IMPORT_KEY_PAIR_MISMATCH,
            ));
        }
        Ok(())
    }

    /// Add the private half of a public-only `version` and persist.
    pub fn import_private_key_for_version(
        &mut self,
        storage: &dyn Storage,
        version: i64,
        key: &[u8],
    ) -> CryptoResult<()> {
        let mut entry = self.entry(version)?.clone();
        let parsed = parse_private_key(key)?;

        let matches = match &parsed {
            ParsedKey::Ec(_, parts) => {
                entry.ec_x.as_ref() == Some(&parts.x) && entry.ec_y.as_ref() == Some(&parts.y)
            }
            ParsedKey::RsaPrivate(private) => entry
                .rsa_public_key()
                .is_some_and(|public| public == private.to_public_key()),
            ParsedKey::Ed25519Private(signing) => base64::decode(&entry.formatted_public_key)
                .is_ok_and(|raw| raw.as_slice() == signing.verifying_key().as_bytes()),
            ParsedKey::Ed25519Public(_) | ParsedKey::RsaPublic(_) => false,
        };
        if !matches {
            return Err(import_error(
                "cannot import key, key pair does not match",
                error_codes::IMPORT_KEY_PAIR_MISMATCH,
            ));
        }

        fill_entry(&mut entry, self.key_type, parsed)?;

        let prior_entry = self.keys.insert(version, entry);
        if let Err(err) = self.persist(storage) {
            if let Some(prior) = prior_entry {
                self.keys.insert(version, prior);
            }
            return Err(err);
        }

        log::info!("imported private key for version {} of policy {}", version, self.name);
        Ok(())
    }
}
