use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};

use super::ec::{decode_asn1_signature, encode_asn1_signature, fixed_width, Curve};
use super::entry::KeyEntry;
use super::key_type::{HashType, KeyType, MarshalingType, SaltLength, SignatureAlgorithm};
use super::managed::missing_managed_parameters;
use super::options::{SigningOptions, SigningResult};
use super::policy::Policy;
use crate::error::{error_codes, CryptoError, CryptoResult};

fn signing_error(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::internal("sign", &cause.to_string(), error_codes::SIGNING_FAILED)
}

fn invalid_salt_length(requested: impl std::fmt::Display) -> CryptoError {
    CryptoError::invalid_request(
        "sign",
        &format!("requested salt length {} is invalid", requested),
        error_codes::SALT_LENGTH_INVALID,
    )
}

/// Longest PSS salt that fits the modulus for `hash`
fn max_pss_salt_length(public: &RsaPublicKey, hash: HashType) -> i64 {
    let modulus_bits = public.n().bits() as i64;
    (modulus_bits - 1 + 7) / 8 - 2 - hash.size() as i64
}

/// Resolve the salt length used to sign.
fn signing_salt_length(public: &RsaPublicKey, hash: HashType, requested: SaltLength) -> CryptoResult<usize> {
    let max = max_pss_salt_length(public, hash);
    let length = match requested {
        SaltLength::Auto => max,
        SaltLength::EqualsHash => hash.size() as i64,
        SaltLength::Explicit(n) => {
            if n as i64 > max {
                return Err(invalid_salt_length(n));
            }
            n as i64
        }
    };
    usize::try_from(length).map_err(|_| invalid_salt_length(length))
}

/// Salt lengths to try when verifying; auto tries every length that fits.
fn verification_salt_lengths(public: &RsaPublicKey, hash: HashType, requested: SaltLength) -> CryptoResult<Vec<usize>> {
    match requested {
        SaltLength::Auto => {
            let max = usize::try_from(max_pss_salt_length(public, hash)).unwrap_or(0);
            let mut lengths = vec![max, hash.size()];
            lengths.extend((0..max).rev().filter(|n| *n != hash.size()));
            lengths.dedup();
            Ok(lengths)
        }
        other => signing_salt_length(public, hash, other).map(|n| vec![n]),
    }
}

fn rsa_sign(
    private: &RsaPrivateKey,
    input: &[u8],
    opts: &SigningOptions<'_>,
) -> CryptoResult<Vec<u8>> {
    match opts.signature_algorithm {
        SignatureAlgorithm::Pss => {
            let salt = signing_salt_length(&private.to_public_key(), opts.hash, opts.salt_length)?;
            with_digest!(opts.hash, D => private
                .sign_with_rng(&mut OsRng, Pss::new_with_salt::<D>(salt), input)
                .map_err(signing_error))
        }
        SignatureAlgorithm::Pkcs1v15 => {
            if opts.hash == HashType::None {
                return private
                    .sign(Pkcs1v15Sign::new_unprefixed(), input)
                    .map_err(signing_error);
            }
            with_digest!(opts.hash, D => private
                .sign(Pkcs1v15Sign::new::<D>(), input)
                .map_err(signing_error))
        }
    }
}

fn rsa_verify(
    public: &RsaPublicKey,
    input: &[u8],
    signature: &[u8],
    opts: &SigningOptions<'_>,
) -> CryptoResult<bool> {
    match opts.signature_algorithm {
        SignatureAlgorithm::Pss => {
            let lengths = verification_salt_lengths(public, opts.hash, opts.salt_length)?;
            with_digest!(opts.hash, D => Ok(lengths.into_iter().any(|salt| {
                public
                    .verify(Pss::new_with_salt::<D>(salt), input, signature)
                    .is_ok()
            })))
        }
        SignatureAlgorithm::Pkcs1v15 => {
            if opts.hash == HashType::None {
                return Ok(public
                    .verify(Pkcs1v15Sign::new_unprefixed(), input, signature)
                    .is_ok());
            }
            with_digest!(opts.hash, D => Ok(public
                .verify(Pkcs1v15Sign::new::<D>(), input, signature)
                .is_ok()))
        }
    }
}

fn check_ed25519_options(opts: &SigningOptions<'_>) -> CryptoResult<()> {
    let refuse = |cause: &str| {
        CryptoError::invalid_request(
            "ed25519",
            &format!("error generating Ed25519 options: {}", cause),
            error_codes::OPERATION_UNSUPPORTED,
        )
    };
    if !opts.ed25519_context.is_empty() {
        return Err(refuse("signature context is not supported feature"));
    }
    if opts.hash == HashType::Sha2_512 {
        return Err(refuse("hash algorithm of SHA2 512 is not supported feature"));
    }
    Ok(())
}

fn derived_ed25519_key(key: &[u8]) -> CryptoResult<SigningKey> {
    let bytes: &[u8; 64] = key.try_into().map_err(|_| {
        CryptoError::internal(
            "ed25519",
            "derived key has the wrong length",
            error_codes::DERIVATION_FAILED,
        )
    })?;
    SigningKey::from_keypair_bytes(bytes)
        .map_err(|e| CryptoError::internal("ed25519", &e.to_string(), error_codes::DERIVATION_FAILED))
}

/// Split a JWS `r || s` signature and re-pad each half to the curve width.
fn normalize_jws_signature(curve: Curve, signature: &[u8]) -> Option<Vec<u8>> {
    let width = curve.field_bytes();
    let (r, s) = signature.split_at(signature.len() / 2);
    let r = BigUint::from_bytes_be(r);
    let s = BigUint::from_bytes_be(s);
    if r.bits() as usize > width * 8 || s.bits() as usize > width * 8 {
        return None;
    }
    let mut fixed = fixed_width(&r, width);
    fixed.extend_from_slice(&fixed_width(&s, width));
    Some(fixed)
}

impl Policy {
    /// Sign `input` with `version` (0 for latest).
    ///
    /// ECDSA, RSA and managed keys expect `input` to be the digest named by
    /// `opts.hash`; Ed25519 signs the message itself.
    pub fn sign(&self, version: i64, input: &[u8], opts: &SigningOptions<'_>) -> CryptoResult<SigningResult> {
        if !self.key_type.signing_supported() {
            return Err(CryptoError::invalid_request(
                "sign",
                &format!("message signing not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let version = self.resolve_version(version, self.min_encryption_version, "signing")?;
        let entry = self.entry(version)?;

        if entry.is_private_key_missing() {
            return Err(CryptoError::invalid_request(
                "sign",
                "requested version for signing does not contain a private part",
                error_codes::MISSING_KEY_MATERIAL,
            ));
        }

        let mut public_key = Vec::new();
        let signature = match self.key_type {
            kt if kt.is_ecdsa() => self.sign_ecdsa(entry, input, opts.marshaling)?,
            KeyType::Ed25519 => {
                check_ed25519_options(opts)?;
                let signer = if self.derived {
                    let key = self.get_key(opts.context, version, 32)?;
                    let signer = derived_ed25519_key(&key)?;
                    public_key = signer.verifying_key().to_bytes().to_vec();
                    signer
                } else {
                    entry.ed25519_signing_key()?
                };
                signer.sign(input).to_bytes().to_vec()
            }
            kt if kt.is_rsa() => {
                let private = entry.rsa_private.as_ref().ok_or_else(|| {
                    CryptoError::invalid_request(
                        "sign",
                        "requested version for signing does not contain a private part",
                        error_codes::MISSING_KEY_MATERIAL,
                    )
                })?;
                rsa_sign(private, input, opts)?
            }
            KeyType::ManagedKey => {
                let system = opts.managed_keys.ok_or_else(missing_managed_parameters)?;
                system.sign(&entry.managed_key_uuid, input, opts.hash)?
            }
            other => {
                return Err(CryptoError::internal(
                    "sign",
                    &format!("unsupported key type {}", other),
                    error_codes::OPERATION_UNSUPPORTED,
                ))
            }
        };

        Ok(SigningResult {
            signature: format!("{}{}", self.version_prefix(version), opts.marshaling.encode(&signature)),
            public_key,
        })
    }

    fn sign_ecdsa(&self, entry: &KeyEntry, input: &[u8], marshaling: MarshalingType) -> CryptoResult<Vec<u8>> {
        let curve = Curve::from_key_type(self.key_type)
            .ok_or_else(|| signing_error(format!("invalid key type {} for ECDSA", self.key_type)))?;
        let d = entry.ec_d.as_ref().ok_or_else(|| {
            CryptoError::invalid_request(
                "sign",
                "requested version for signing does not contain a private part",
                error_codes::MISSING_KEY_MATERIAL,
            )
        })?;
        let fixed = curve.sign_prehash(d, input)?;
        match marshaling {
            MarshalingType::Asn1 => encode_asn1_signature(&fixed),
            MarshalingType::Jws => Ok(fixed),
        }
    }

    /// Verify a version-prefixed signature over `input`.
    ///
    /// A signature that does not match yields `Ok(false)`; malformed
    /// envelopes and disallowed versions are errors.
    pub fn verify_signature(&self, input: &[u8], signature: &str, opts: &SigningOptions<'_>) -> CryptoResult<bool> {
        if !self.key_type.signing_supported() {
            return Err(CryptoError::invalid_request(
                "verify",
                &format!("message verification not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }

        let (version, payload) = self.parse_envelope(signature, "signature")?;
        if version > self.latest_version {
            return Err(CryptoError::invalid_request(
                "verify",
                "invalid signature: version is too new",
                error_codes::POLICY_VERSION_INVALID,
            ));
        }
        if self.min_decryption_version > 0 && version < self.min_decryption_version {
            return Err(CryptoError::too_old(version));
        }

        let sig_bytes = opts.marshaling.decode(payload).map_err(|_| {
            CryptoError::invalid_request(
                "verify",
                "invalid base64 signature value",
                error_codes::SIGNATURE_MALFORMED,
            )
        })?;

        match self.key_type {
            kt if kt.is_ecdsa() => {
                let entry = self.entry(version)?;
                self.verify_ecdsa(entry, input, &sig_bytes, opts.marshaling)
            }
            KeyType::Ed25519 => {
                check_ed25519_options(opts)?;
                let public = if self.derived {
                    let key = self.get_key(opts.context, version, 32)?;
                    derived_ed25519_key(&key)?.verifying_key()
                } else {
                    self.entry(version)?.ed25519_verifying_key()?
                };
                Ok(verify_ed25519(&public, input, &sig_bytes))
            }
            kt if kt.is_rsa() => {
                let public = self.entry(version)?.rsa_public_key().ok_or_else(|| {
                    CryptoError::internal(
                        "verify",
                        "key version has no RSA public key",
                        error_codes::MISSING_KEY_MATERIAL,
                    )
                })?;
                rsa_verify(&public, input, &sig_bytes, opts)
            }
            KeyType::ManagedKey => {
                let entry = self.entry(version)?;
                let system = opts.managed_keys.ok_or_else(missing_managed_parameters)?;
                system.verify(&entry.managed_key_uuid, input, &sig_bytes, opts.hash)
            }
            other => Err(CryptoError::internal(
                "verify",
                &format!("unsupported key type {}", other),
                error_codes::OPERATION_UNSUPPORTED,
            )),
        }
    }

    fn verify_ecdsa(
        &self,
        entry: &KeyEntry,
        input: &[u8],
        sig_bytes: &[u8],
        marshaling: MarshalingType,
    ) -> CryptoResult<bool> {
        let curve = Curve::from_key_type(self.key_type)
            .ok_or_else(|| signing_error(format!("invalid key type {} for ECDSA", self.key_type)))?;
        let (x, y) = match (&entry.ec_x, &entry.ec_y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(CryptoError::internal(
                    "verify",
                    "key version has no EC public key",
                    error_codes::MISSING_KEY_MATERIAL,
                ))
            }
        };

        let fixed = match marshaling {
            MarshalingType::Asn1 => decode_asn1_signature(curve, sig_bytes)?,
            MarshalingType::Jws => match normalize_jws_signature(curve, sig_bytes) {
                Some(fixed) => fixed,
                None => return Ok(false),
            },
        };
        Ok(curve.verify_prehash(x, y, input, &fixed))
    }
}

fn verify_ed25519(public: &VerifyingKey, input: &[u8], signature: &[u8]) -> bool {
    match Ed25519Signature::from_slice(signature) {
        Ok(signature) => public.verify(input, &signature).is_ok(),
        Err(_) => false,
    }
}
