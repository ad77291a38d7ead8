use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use rsa::{Oaep, Pkcs1v15Encrypt};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::entry::KeyEntry;
use super::key_type::{Kdf, KeyType, PaddingScheme};
use super::managed::missing_managed_parameters;
use super::options::EncryptOptions;
use super::policy::Policy;
use crate::aead::{AeadCipher, AeadProvider};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::kbkdf::{legacy_counter_mode, HmacPrf, HMAC_SHA256_PRF_LEN};

const MISSING_CONTEXT: &str = "missing 'context' for key derivation; the key was created using a derived key, which means additional, per-request information must be included in order to perform operations with the key";

/// Inputs to [`Policy::symmetric_encrypt_raw`] and
/// [`Policy::symmetric_decrypt_raw`]
#[derive(Clone, Copy, Default)]
pub struct SymmetricOpts<'a> {
    pub convergent: bool,
    /// Caller nonce; required for convergent v1
    pub nonce: &'a [u8],
    pub associated_data: &'a [u8],
    /// Key for synthesizing convergent v2/v3 nonces
    pub hmac_key: &'a [u8],
    /// Cipher of a managed key
    pub aead_provider: Option<&'a dyn AeadProvider>,
}

fn encrypt_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("encrypt", cause, error_codes::ENCRYPTION_FAILED)
}

fn decrypt_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("decrypt", cause, error_codes::DECRYPTION_FAILED)
}

fn nonce_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request("encrypt", cause, error_codes::NONCE_INVALID)
}

fn derivation_internal(cause: &str) -> CryptoError {
    CryptoError::internal("derive key", cause, error_codes::DERIVATION_FAILED)
}

fn missing_rsa_key(which: &str) -> CryptoError {
    CryptoError::internal(
        "rsa",
        &format!("key version has no RSA {} key", which),
        error_codes::MISSING_KEY_MATERIAL,
    )
}

impl Policy {
    /// Key bytes for `version`: the raw key for non-derived policies, the
    /// derived key otherwise.
    pub fn get_key(&self, context: &[u8], version: i64, num_bytes: usize) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if !self.derived {
            return Ok(self.entry(version)?.key.clone());
        }
        self.derive_key(context, &[], version, num_bytes)
    }

    /// Derive a key for `context` and `salt` from `version`.
    ///
    /// This ignores the `derived` flag; [`Policy::get_key`] decides when to
    /// derive. For Ed25519 the result is the 64-byte private key generated
    /// from the derived seed.
    pub fn derive_key(
        &self,
        context: &[u8],
        salt: &[u8],
        version: i64,
        num_bytes: usize,
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        if !self.key_type.derivation_supported() {
            return Err(CryptoError::invalid_request(
                "derive key",
                &format!("derivation not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }
        if self.keys.is_empty() || self.latest_version == 0 {
            return Err(CryptoError::internal(
                "derive key",
                "unable to access the key; no key versions found",
                error_codes::MISSING_KEY_MATERIAL,
            ));
        }
        if version <= 0 || version > self.latest_version {
            return Err(CryptoError::invalid_request(
                "derive key",
                "invalid key version",
                error_codes::POLICY_VERSION_INVALID,
            ));
        }
        if context.is_empty() {
            return Err(CryptoError::invalid_request(
                "derive key",
                MISSING_CONTEXT,
                error_codes::DERIVATION_FAILED,
            ));
        }

        let entry = self.entry(version)?;

        match self.kdf {
            Kdf::HmacSha256Counter => {
                let prf = HmacPrf::sha256(&entry.key);
                let mut data = Zeroizing::new(Vec::with_capacity(context.len() + salt.len()));
                data.extend_from_slice(context);
                data.extend_from_slice(salt);
                legacy_counter_mode(&prf, &data, HMAC_SHA256_PRF_LEN)
            }
            Kdf::HkdfSha256 => {
                let salt = if salt.is_empty() { None } else { Some(salt) };
                let hkdf = Hkdf::<Sha256>::new(salt, &entry.key);

                match self.key_type {
                    kt if kt.is_aead() => {
                        let mut out = Zeroizing::new(vec![0u8; num_bytes]);
                        hkdf.expand(context, &mut out).map_err(|_| {
                            derivation_internal(&format!(
                                "unable to read enough derived bytes, needed {}",
                                num_bytes
                            ))
                        })?;
                        Ok(out)
                    }
                    KeyType::Ed25519 => {
                        let mut seed = Zeroizing::new([0u8; 32]);
                        hkdf.expand(context, &mut *seed).map_err(|_| {
                            derivation_internal("error generating derived key")
                        })?;
                        let signing = SigningKey::from_bytes(&seed);
                        Ok(Zeroizing::new(signing.to_keypair_bytes().to_vec()))
                    }
                    _ => Err(derivation_internal("unsupported key type for derivation")),
                }
            }
        }
    }

    /// Encrypt base64 `value` with `version` (0 for latest) and return the
    /// version-prefixed envelope.
    pub fn encrypt(&self, version: i64, value: &str, opts: &EncryptOptions<'_>) -> CryptoResult<String> {
        if !self.key_type.encryption_supported() {
            return Err(CryptoError::invalid_request(
                "encrypt",
                &format!("message encryption not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }
        self.check_associated_data(opts)?;

        let plaintext = Zeroizing::new(base64::decode(value).map_err(|e| encrypt_error(&e.to_string()))?);
        let version = self.resolve_version(version, self.min_encryption_version, "encryption")?;

        let ciphertext = match self.key_type {
            kt if kt.is_aead() => self.encrypt_symmetric(version, &plaintext, opts)?,
            kt if kt.is_rsa() => {
                let public = self
                    .entry(version)?
                    .rsa_public_key()
                    .ok_or_else(|| missing_rsa_key("public"))?;
                let mut rng = OsRng;
                let sealed = match opts.padding() {
                    PaddingScheme::Oaep => public.encrypt(&mut rng, Oaep::new::<Sha256>(), &plaintext),
                    PaddingScheme::Pkcs1v15 => public.encrypt(&mut rng, Pkcs1v15Encrypt, &plaintext),
                };
                sealed.map_err(|e| {
                    CryptoError::internal(
                        "encrypt",
                        &format!("failed to RSA encrypt the plaintext: {}", e),
                        error_codes::ENCRYPTION_FAILED,
                    )
                })?
            }
            KeyType::ManagedKey => {
                let entry = self.entry(version)?;
                self.encrypt_with_managed_key(version, entry, &plaintext, opts)?
            }
            other => {
                return Err(CryptoError::internal(
                    "encrypt",
                    &format!("unsupported key type {}", other),
                    error_codes::OPERATION_UNSUPPORTED,
                ))
            }
        };

        Ok(format!("{}{}", self.version_prefix(version), base64::encode(ciphertext)))
    }

    fn encrypt_symmetric(&self, version: i64, plaintext: &[u8], opts: &EncryptOptions<'_>) -> CryptoResult<Vec<u8>> {
        let convergent_version = self.convergent_version_for(version);
        let enc_bytes = self.key_type.symmetric_key_size().unwrap_or(32);

        let hmac_bytes = if convergent_version > 2 {
            if !opts.nonce.is_empty() {
                return Err(nonce_error("nonce provided when not allowed"));
            }
            32
        } else {
            if !opts.nonce.is_empty() && (!self.convergent_encryption || convergent_version != 1) {
                return Err(nonce_error("nonce provided when not allowed"));
            }
            0
        };

        let key = self.get_key(opts.context, version, enc_bytes + hmac_bytes)?;
        if key.len() < enc_bytes + hmac_bytes {
            return Err(derivation_internal("could not derive key, length too small"));
        }

        let enc_key = &key[..enc_bytes];
        let hmac_key = if hmac_bytes > 0 {
            &key[enc_bytes..enc_bytes + hmac_bytes]
        } else {
            opts.context
        };

        self.symmetric_encrypt_raw(
            version,
            enc_key,
            plaintext,
            SymmetricOpts {
                convergent: self.convergent_encryption,
                nonce: opts.nonce,
                associated_data: opts.associated_data,
                hmac_key,
                aead_provider: opts.aead_provider,
            },
        )
    }

    fn encrypt_with_managed_key(
        &self,
        version: i64,
        entry: &KeyEntry,
        plaintext: &[u8],
        opts: &EncryptOptions<'_>,
    ) -> CryptoResult<Vec<u8>> {
        if self.convergent_encryption || !opts.nonce.is_empty() {
            return Err(nonce_error(
                "cannot use convergent encryption or provide a nonce to managed-key backed encryption",
            ));
        }
        if let Some(system) = opts.managed_keys {
            return system.encrypt(&entry.managed_key_uuid, plaintext, opts.associated_data);
        }
        if opts.aead_provider.is_some() {
            return self.symmetric_encrypt_raw(
                version,
                &[],
                plaintext,
                SymmetricOpts {
                    associated_data: opts.associated_data,
                    aead_provider: opts.aead_provider,
                    ..Default::default()
                },
            );
        }
        Err(missing_managed_parameters())
    }

    /// Decrypt a version-prefixed envelope and return the base64 plaintext.
    pub fn decrypt(&self, value: &str, opts: &EncryptOptions<'_>) -> CryptoResult<String> {
        if !self.key_type.decryption_supported() {
            return Err(CryptoError::invalid_request(
                "decrypt",
                &format!("message decryption not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }
        self.check_associated_data(opts)?;

        let (mut version, payload) = self.parse_envelope(value, "ciphertext")?;
        // Envelopes from before versioning carry 0
        if version == 0 {
            version = 1;
        }
        if version > self.latest_version {
            return Err(CryptoError::invalid_request(
                "decrypt",
                "invalid ciphertext: version is too new",
                error_codes::POLICY_VERSION_INVALID,
            ));
        }
        if self.min_decryption_version > 0 && version < self.min_decryption_version {
            return Err(CryptoError::too_old(version));
        }

        if self.convergent_version_for(version) == 1 && opts.nonce.is_empty() {
            return Err(CryptoError::invalid_request(
                "decrypt",
                "invalid convergent nonce supplied",
                error_codes::NONCE_INVALID,
            ));
        }

        let decoded = base64::decode(payload)
            .map_err(|_| decrypt_error("invalid ciphertext: could not decode base64"))?;

        let plaintext = Zeroizing::new(match self.key_type {
            kt if kt.is_aead() => {
                let num_bytes = kt.symmetric_key_size().unwrap_or(32);
                let enc_key = self.get_key(opts.context, version, num_bytes)?;
                if enc_key.len() != num_bytes {
                    return Err(derivation_internal("could not derive enc key, length not correct"));
                }
                self.symmetric_decrypt_raw(
                    version,
                    &enc_key,
                    &decoded,
                    SymmetricOpts {
                        convergent: self.convergent_encryption,
                        nonce: opts.nonce,
                        associated_data: opts.associated_data,
                        hmac_key: &[],
                        aead_provider: opts.aead_provider,
                    },
                )?
            }
            kt if kt.is_rsa() => {
                let private = self
                    .entry(version)?
                    .rsa_private
                    .as_ref()
                    .ok_or_else(|| missing_rsa_key("private"))?;
                let opened = match opts.padding() {
                    PaddingScheme::Oaep => private.decrypt(Oaep::new::<Sha256>(), &decoded),
                    PaddingScheme::Pkcs1v15 => private.decrypt(Pkcs1v15Encrypt, &decoded),
                };
                opened.map_err(|_| CryptoError::authentication_failure("decrypt"))?
            }
            KeyType::ManagedKey => {
                let entry = self.entry(version)?;
                if let Some(system) = opts.managed_keys {
                    system.decrypt(&entry.managed_key_uuid, &decoded, opts.associated_data)?
                } else if opts.aead_provider.is_some() {
                    self.symmetric_decrypt_raw(
                        version,
                        &[],
                        &decoded,
                        SymmetricOpts {
                            associated_data: opts.associated_data,
                            aead_provider: opts.aead_provider,
                            ..Default::default()
                        },
                    )?
                } else {
                    return Err(missing_managed_parameters());
                }
            }
            other => {
                return Err(CryptoError::internal(
                    "decrypt",
                    &format!("unsupported key type {}", other),
                    error_codes::OPERATION_UNSUPPORTED,
                ))
            }
        });

        Ok(base64::encode(&*plaintext))
    }

    fn check_associated_data(&self, opts: &EncryptOptions<'_>) -> CryptoResult<()> {
        if !opts.associated_data.is_empty() && !self.key_type.associated_data_supported() {
            return Err(CryptoError::invalid_request(
                "associated data",
                &format!("associated data not supported for key type {}", self.key_type),
                error_codes::OPERATION_UNSUPPORTED,
            ));
        }
        Ok(())
    }

    /// Seal `plaintext` under `enc_key` following the policy's convergence
    /// settings for `version`. Returns `nonce || ciphertext` except for
    /// convergent v1, which omits the nonce.
    pub fn symmetric_encrypt_raw(
        &self,
        version: i64,
        enc_key: &[u8],
        plaintext: &[u8],
        opts: SymmetricOpts<'_>,
    ) -> CryptoResult<Vec<u8>> {
        if self.key_type == KeyType::ManagedKey && (opts.convergent || !opts.nonce.is_empty()) {
            return Err(nonce_error(
                "cannot use convergent encryption or provide a nonce to managed-key backed encryption",
            ));
        }

        let built;
        let aead: &dyn AeadProvider = match self.aead_for(&opts)? {
            Some(provider) => provider,
            None => {
                built = AeadCipher::new(self.key_type, enc_key)?;
                &built
            }
        };
        let nonce_size = aead.nonce_size();
        let convergent_version = self.convergent_version_for(version);

        let nonce: Vec<u8> = if opts.convergent {
            match convergent_version {
                1 => {
                    if opts.nonce.len() != nonce_size {
                        return Err(nonce_error(&format!(
                            "base64-decoded nonce must be {} bytes long when using convergent encryption with this key",
                            nonce_size
                        )));
                    }
                    opts.nonce.to_vec()
                }
                2 | 3 => {
                    if opts.hmac_key.is_empty() {
                        return Err(CryptoError::internal(
                            "encrypt",
                            "invalid hmac key length of zero",
                            error_codes::NONCE_INVALID,
                        ));
                    }
                    let mut mac = Hmac::<Sha256>::new_from_slice(opts.hmac_key).map_err(|e| {
                        CryptoError::internal("encrypt", &e.to_string(), error_codes::NONCE_INVALID)
                    })?;
                    mac.update(plaintext);
                    let sum = mac.finalize().into_bytes();
                    sum.get(..nonce_size)
                        .ok_or_else(|| {
                            CryptoError::internal(
                                "encrypt",
                                "nonce is longer than the synthetic nonce source",
                                error_codes::NONCE_INVALID,
                            )
                        })?
                        .to_vec()
                }
                other => {
                    return Err(CryptoError::internal(
                        "encrypt",
                        &format!("unhandled convergent version {}", other),
                        error_codes::NONCE_INVALID,
                    ))
                }
            }
        } else if opts.nonce.is_empty() {
            let mut nonce = vec![0u8; nonce_size];
            OsRng.fill_bytes(&mut nonce);
            nonce
        } else if opts.nonce.len() != nonce_size {
            return Err(nonce_error(&format!(
                "base64-decoded nonce must be {} bytes long but given {} bytes",
                nonce_size,
                opts.nonce.len()
            )));
        } else {
            opts.nonce.to_vec()
        };

        let sealed = aead.seal(&nonce, plaintext, opts.associated_data)?;

        if !opts.convergent || convergent_version > 1 {
            let mut out = nonce;
            out.extend_from_slice(&sealed);
            Ok(out)
        } else {
            Ok(sealed)
        }
    }

    /// Open the output of [`Policy::symmetric_encrypt_raw`].
    pub fn symmetric_decrypt_raw(
        &self,
        version: i64,
        enc_key: &[u8],
        ciphertext: &[u8],
        opts: SymmetricOpts<'_>,
    ) -> CryptoResult<Vec<u8>> {
        let built;
        let aead: &dyn AeadProvider = match self.aead_for(&opts)? {
            Some(provider) => provider,
            None => {
                built = AeadCipher::new(self.key_type, enc_key)?;
                &built
            }
        };
        let nonce_size = aead.nonce_size();

        if ciphertext.len() < nonce_size {
            return Err(decrypt_error("invalid ciphertext length"));
        }

        // Convergent v1 ciphertexts carry no nonce; the caller supplies it
        let (nonce, body) = if opts.convergent && self.convergent_version_for(version) == 1 {
            (opts.nonce, ciphertext)
        } else {
            ciphertext.split_at(nonce_size)
        };

        aead.open(nonce, body, opts.associated_data)
    }

    /// The external cipher of a managed key, or `None` when the built-in
    /// cipher for the key type applies.
    fn aead_for<'a>(&self, opts: &SymmetricOpts<'a>) -> CryptoResult<Option<&'a dyn AeadProvider>> {
        if self.key_type != KeyType::ManagedKey {
            return Ok(None);
        }
        opts.aead_provider.map(Some).ok_or_else(|| {
            CryptoError::internal(
                "managed key",
                "expected AEAD provider from managed key, none provided",
                error_codes::MISSING_KEY_MATERIAL,
            )
        })
    }
}
