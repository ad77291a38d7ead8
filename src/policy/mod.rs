/*!
 * Versioned named keys
 *
 * A [`Policy`] owns every version of one key together with its operating
 * settings, and carries the key operations (encrypt, decrypt, sign, verify,
 * HMAC, CMAC, import, wrap and certificate handling) that dispatch on its
 * key type.
 */

/// Run `$body` with `$d` bound to the digest type selected by `$hash`.
macro_rules! with_digest {
    ($hash:expr, $d:ident => $body:expr) => {
        match $hash {
            $crate::policy::key_type::HashType::Sha2_224 => {
                type $d = sha2::Sha224;
                $body
            }
            $crate::policy::key_type::HashType::Sha2_256 => {
                type $d = sha2::Sha256;
                $body
            }
            $crate::policy::key_type::HashType::Sha2_384 => {
                type $d = sha2::Sha384;
                $body
            }
            $crate::policy::key_type::HashType::Sha2_512 => {
                type $d = sha2::Sha512;
                $body
            }
            $crate::policy::key_type::HashType::Sha3_224 => {
                type $d = sha3::Sha3_224;
                $body
            }
            $crate::policy::key_type::HashType::Sha3_256 => {
                type $d = sha3::Sha3_256;
                $body
            }
            $crate::policy::key_type::HashType::Sha3_384 => {
                type $d = sha3::Sha3_384;
                $body
            }
            $crate::policy::key_type::HashType::Sha3_512 => {
                type $d = sha3::Sha3_512;
                $body
            }
            other => Err($crate::policy::key_type::unsupported_hash(other)),
        }
    };
}

mod cert;
mod cipher;
pub(crate) mod ec;
mod entry;
mod import;
pub mod key_type;
mod mac;
mod managed;
mod options;
#[allow(clippy::module_inception)]
mod policy;
mod sign;
mod wrap;

pub use cipher::SymmetricOpts;
pub use entry::{ArchivedKeys, BackupInfo, KeyData, KeyEntry, RestoreInfo};
pub use key_type::{
    HashType, Kdf, KeyType, MarshalingType, PaddingScheme, SaltLength, SignatureAlgorithm,
    CURRENT_CONVERGENT_VERSION, DEFAULT_VERSION_TEMPLATE, HMAC_DEFAULT_KEY_SIZE, HMAC_MAX_KEY_SIZE,
    HMAC_MIN_KEY_SIZE,
};
pub use mac::CMAC_MAX_LENGTH;
pub use managed::ManagedKeySystem;
pub use options::{DecryptOptions, EncryptOptions, SigningOptions, SigningResult};
pub use policy::{Policy, PolicyConfig, VERSION_PLACEHOLDER};
pub use wrap::unwrap_key;

#[cfg(test)]
mod tests;
