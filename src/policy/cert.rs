use std::str::FromStr;

use der::asn1::{Any, BitString, ObjectIdentifier};
use der::oid::AssociatedOid;
use der::pem::LineEnding;
use der::{Decode, Encode, EncodePem};
use ed25519_dalek::{Signer, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::Sha256;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, Version};
use x509_cert::Certificate;

use super::ec::{encode_asn1_signature, Curve};
use super::entry::KeyEntry;
use super::key_type::{HashType, KeyType};
use super::policy::Policy;
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::storage::Storage;

const OID_ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const OID_ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const OID_SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

fn cert_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("certificate", cause, error_codes::CERTIFICATE_INVALID)
}

fn csr_error(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::internal(
        "create csr",
        &format!("could not create the certificate request: {}", cause),
        error_codes::CERTIFICATE_INVALID,
    )
}

fn derived_ed25519_unsupported() -> CryptoError {
    CryptoError::invalid_request(
        "certificate",
        "operation not supported on keys with derivation enabled",
        error_codes::OPERATION_UNSUPPORTED,
    )
}

/// `Some(is_ca)` when the certificate carries basic constraints
fn basic_constraints_ca(cert: &Certificate) -> CryptoResult<Option<bool>> {
    let extensions = match &cert.tbs_certificate.extensions {
        Some(extensions) => extensions,
        None => return Ok(None),
    };
    for extension in extensions {
        if extension.extn_id == BasicConstraints::OID {
            let constraints = BasicConstraints::from_der(extension.extn_value.as_bytes())
                .map_err(|e| cert_error(&format!("invalid basic constraints: {}", e)))?;
            return Ok(Some(constraints.ca));
        }
    }
    Ok(None)
}

fn algorithm_name(oid: &ObjectIdentifier) -> &'static str {
    if *oid == OID_RSA_ENCRYPTION {
        "RSA"
    } else if *oid == OID_EC_PUBLIC_KEY {
        "ECDSA"
    } else if *oid == OID_ED25519 {
        "Ed25519"
    } else {
        "unknown"
    }
}

impl Policy {
    /// PEM `CERTIFICATE REQUEST` for `subject` (an RFC 4514 name such as
    /// `CN=example.com,O=Example`) signed by the private key of `version`.
    pub fn create_csr(&self, version: i64, subject: &str) -> CryptoResult<String> {
        if !self.key_type.signing_supported() {
            return Err(CryptoError::invalid_request(
                "create csr",
                &format!("key type '{}' does not support signing", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let version = self.resolve_version(version, 0, "certificate request")?;
        let entry = self.entry(version)?;
        if entry.is_private_key_missing() {
            return Err(CryptoError::invalid_request(
                "create csr",
                "private key not imported for key version selected",
                error_codes::MISSING_KEY_MATERIAL,
            ));
        }
        if self.key_type == KeyType::Ed25519 && self.derived {
            return Err(derived_ed25519_unsupported());
        }

        let subject = Name::from_str(subject)
            .map_err(|e| cert_error(&format!("invalid subject: {}", e)))?;
        let public_key = SubjectPublicKeyInfoOwned::from_der(&entry.public_key_der(self.key_type)?)
            .map_err(csr_error)?;
        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key,
            attributes: Default::default(),
        };

        let tbs = info.to_der().map_err(csr_error)?;
        let (algorithm, signature) = self.sign_request(entry, &tbs)?;
        let request = CertReq {
            info,
            algorithm,
            signature: BitString::from_bytes(&signature).map_err(csr_error)?,
        };

        log::debug!("created certificate request for version {} of policy {}", version, self.name);
        request.to_pem(LineEnding::LF).map_err(csr_error)
    }

    fn sign_request(&self, entry: &KeyEntry, tbs: &[u8]) -> CryptoResult<(AlgorithmIdentifierOwned, Vec<u8>)> {
        let identifier = |oid, parameters| AlgorithmIdentifierOwned { oid, parameters };
        let missing_private = || {
            CryptoError::invalid_request(
                "create csr",
                "private key not imported for key version selected",
                error_codes::MISSING_KEY_MATERIAL,
            )
        };

        match self.key_type {
            kt if kt.is_ecdsa() => {
                let curve = Curve::from_key_type(kt).ok_or_else(missing_private)?;
                let (hash, oid) = match curve {
                    Curve::P256 => (HashType::Sha2_256, OID_ECDSA_WITH_SHA256),
                    Curve::P384 => (HashType::Sha2_384, OID_ECDSA_WITH_SHA384),
                    Curve::P521 => (HashType::Sha2_512, OID_ECDSA_WITH_SHA512),
                };
                let d = entry.ec_d.as_ref().ok_or_else(missing_private)?;
                let fixed = curve.sign_prehash(d, &hash.digest(tbs)?)?;
                Ok((identifier(oid, None), encode_asn1_signature(&fixed)?))
            }
            KeyType::Ed25519 => {
                let signing = entry.ed25519_signing_key()?;
                Ok((identifier(OID_ED25519, None), signing.sign(tbs).to_bytes().to_vec()))
            }
            kt if kt.is_rsa() => {
                let private = entry.rsa_private.as_ref().ok_or_else(missing_private)?;
                let digest = HashType::Sha2_256.digest(tbs)?;
                let signature = private
                    .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(csr_error)?;
                Ok((identifier(OID_SHA256_WITH_RSA, Some(Any::null())), signature))
            }
            other => Err(CryptoError::internal(
                "create csr",
                &format!("selected key type '{}' does not support signing", other),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }

    /// Whether the leaf certificate's key is the key of `version`.
    fn leaf_matches_version(&self, version: i64, leaf: &Certificate) -> CryptoResult<bool> {
        if !self.key_type.signing_supported() {
            return Err(cert_error(&format!("key type '{}' does not support signing", self.key_type)));
        }

        let spki = &leaf.tbs_certificate.subject_public_key_info;
        let algorithm = &spki.algorithm.oid;
        let type_matches = match self.key_type {
            kt if kt.is_ecdsa() => *algorithm == OID_EC_PUBLIC_KEY,
            KeyType::Ed25519 => *algorithm == OID_ED25519,
            kt if kt.is_rsa() => *algorithm == OID_RSA_ENCRYPTION,
            _ => false,
        };
        if !type_matches {
            return Err(cert_error(&format!(
                "provided leaf certificate public key algorithm '{}' does not match the transit key type '{}'",
                algorithm_name(algorithm),
                self.key_type
            )));
        }

        let entry = self.entry(version)?;
        let spki_der = spki
            .to_der()
            .map_err(|e| cert_error(&format!("invalid leaf public key: {}", e)))?;

        match self.key_type {
            kt if kt.is_ecdsa() => {
                let curve = match Curve::from_key_type(kt) {
                    Some(curve) => curve,
                    None => return Ok(false),
                };
                Ok(match curve.parse_spki(&spki_der) {
                    Ok(parts) => {
                        entry.ec_x.as_ref() == Some(&parts.x) && entry.ec_y.as_ref() == Some(&parts.y)
                    }
                    Err(_) => false,
                })
            }
            KeyType::Ed25519 => {
                if self.derived {
                    return Err(derived_ed25519_unsupported());
                }
                let stored = entry.ed25519_verifying_key()?;
                Ok(VerifyingKey::try_from(spki.subject_public_key.raw_bytes())
                    .is_ok_and(|leaf_key| leaf_key == stored))
            }
            _ => {
                let leaf_key = RsaPublicKey::from_public_key_der(&spki_der).ok();
                Ok(leaf_key.is_some() && leaf_key == entry.rsa_public_key())
            }
        }
    }

    /// Check a DER certificate chain (leaf first) against `version` and
    /// store it on that version.
    pub fn validate_and_persist_certificate_chain(
        &mut self,
        storage: &dyn Storage,
        version: i64,
        chain: &[Vec<u8>],
    ) -> CryptoResult<()> {
        if chain.is_empty() {
            return Err(cert_error("expected at least one certificate in the parsed certificate chain"));
        }

        let certificates = chain
            .iter()
            .map(|der| {
                Certificate::from_der(der)
                    .map_err(|e| cert_error(&format!("failed to parse certificate: {}", e)))
            })
            .collect::<CryptoResult<Vec<_>>>()?;

        if basic_constraints_ca(&certificates[0])? == Some(true) {
            return Err(cert_error("certificate in the first position is not a leaf certificate"));
        }
        for certificate in &certificates[1..] {
            if basic_constraints_ca(certificate)? == Some(false) {
                return Err(cert_error(
                    "provided certificate chain contains more than one leaf certificate",
                ));
            }
        }

        let valid = self.leaf_matches_version(version, &certificates[0]).map_err(|err| {
            let prefix = "could not validate key match between leaf certificate key and key version in transit";
            match err {
                CryptoError::InvalidRequest { cause, error_code, .. } => CryptoError::invalid_request(
                    "certificate",
                    &format!("{}: {}", prefix, cause),
                    error_code,
                ),
                other => CryptoError::internal(
                    "certificate",
                    &format!("{}: {}", prefix, other),
                    error_codes::CERTIFICATE_INVALID,
                ),
            }
        })?;
        if !valid {
            return Err(CryptoError::internal(
                "certificate",
                "leaf certificate public key does match the key version selected",
                error_codes::CERTIFICATE_INVALID,
            ));
        }

        let mut entry = self.entry(version)?.clone();
        entry.certificate_chain = chain.to_vec();
        let prior = self.keys.insert(version, entry);

        if let Err(err) = self.persist(storage) {
            if let Some(prior) = prior {
                self.keys.insert(version, prior);
            }
            return Err(err);
        }

        log::info!(
            "stored certificate chain of {} certificates on version {} of policy {}",
            chain.len(),
            version,
            self.name
        );
        Ok(())
    }
}
