use aes::{Aes128, Aes192, Aes256};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::error::{error_codes, CryptoError, CryptoResult};

/// A keyed pseudorandom function with a fixed output size.
///
/// The key is bound at construction, so the KBKDF engine only ever feeds
/// it the encoded fixed input data.
pub trait Prf {
    /// Output size in bytes
    fn output_size(&self) -> usize;

    /// Compute one PRF block over `input`
    fn compute(&self, input: &[u8]) -> CryptoResult<Vec<u8>>;
}

impl<P: Prf + ?Sized> Prf for &P {
    fn output_size(&self) -> usize {
        (**self).output_size()
    }

    fn compute(&self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        (**self).compute(input)
    }
}

/// Digest used by [`HmacPrf`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacHash {
    Sha256,
    Sha384,
    Sha512,
}

/// HMAC keyed with a derivation key
pub struct HmacPrf {
    hash: HmacHash,
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for HmacPrf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacPrf")
            .field("hash", &self.hash)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl HmacPrf {
    pub fn new(hash: HmacHash, key: &[u8]) -> Self {
        Self {
            hash,
            key: Zeroizing::new(key.to_vec()),
        }
    }

    pub fn sha256(key: &[u8]) -> Self {
        Self::new(HmacHash::Sha256, key)
    }
}

fn prf_failure(cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::internal("prf", &cause.to_string(), error_codes::KBKDF_PRF_FAILED)
}

impl Prf for HmacPrf {
    fn output_size(&self) -> usize {
        match self.hash {
            HmacHash::Sha256 => 32,
            HmacHash::Sha384 => 48,
            HmacHash::Sha512 => 64,
        }
    }

    fn compute(&self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        macro_rules! hmac_once {
            ($digest:ty) => {{
                let mut mac = Hmac::<$digest>::new_from_slice(&self.key).map_err(prf_failure)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }};
        }

        Ok(match self.hash {
            HmacHash::Sha256 => hmac_once!(Sha256),
            HmacHash::Sha384 => hmac_once!(Sha384),
            HmacHash::Sha512 => hmac_once!(Sha512),
        })
    }
}

/// AES-CMAC keyed with a 16, 24 or 32 byte derivation key
pub struct CmacPrf {
    key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for CmacPrf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmacPrf")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl CmacPrf {
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        match key.len() {
            16 | 24 | 32 => Ok(Self {
                key: Zeroizing::new(key.to_vec()),
            }),
            n => Err(CryptoError::invalid_request(
                "cmac prf",
                &format!("invalid AES key length {} for CMAC", n),
                error_codes::KBKDF_INVALID_PARAMETERS,
            )),
        }
    }
}

impl Prf for CmacPrf {
    fn output_size(&self) -> usize {
        16
    }

    fn compute(&self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        macro_rules! cmac_once {
            ($cipher:ty) => {{
                let mut mac = Cmac::<$cipher>::new_from_slice(&self.key).map_err(prf_failure)?;
                mac.update(input);
                mac.finalize().into_bytes().to_vec()
            }};
        }

        Ok(match self.key.len() {
            16 => cmac_once!(Aes128),
            24 => cmac_once!(Aes192),
            _ => cmac_once!(Aes256),
        })
    }
}
