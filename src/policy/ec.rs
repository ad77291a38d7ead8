//! NIST curve helpers shared by generation, signing and import.
//!
//! Entries store ECDSA keys as the big integers `d`, `x` and `y`; these
//! helpers convert between that form and the curve crates.

use der::asn1::{ObjectIdentifier, UintRef};
use der::{Decode, Encode, Header, Reader, SliceReader, Tag};
use rand_core::CryptoRngCore;
use rsa::BigUint;
use zeroize::Zeroizing;

use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::policy::KeyType;

/// Key material of one ECDSA key
#[derive(Clone)]
pub(crate) struct EcKeyParts {
    pub d: Option<BigUint>,
    pub x: BigUint,
    pub y: BigUint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Curve {
    P256,
    P384,
    P521,
}

pub(crate) const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
pub(crate) const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
pub(crate) const OID_P521: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");

fn ec_error(operation: &str, cause: impl std::fmt::Display) -> CryptoError {
    CryptoError::internal(operation, &cause.to_string(), error_codes::SIGNING_FAILED)
}

/// Left-pad a big-endian integer to `width` bytes.
pub(crate) fn fixed_width(value: &BigUint, width: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= width {
        return bytes[bytes.len() - width..].to_vec();
    }
    let mut out = vec![0u8; width - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

macro_rules! curve_ops {
    ($module:ident, $krate:ident) => {
        mod $module {
            use super::*;
            use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
            use spki::{DecodePublicKey, EncodePublicKey};
            use $krate::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
            use $krate::ecdsa::{Signature, SigningKey, VerifyingKey};
            use $krate::elliptic_curve::sec1::ToEncodedPoint;
            use $krate::{PublicKey, SecretKey};

            fn public_parts(public: &PublicKey) -> CryptoResult<(BigUint, BigUint)> {
                let point = public.to_encoded_point(false);
                match (point.x(), point.y()) {
                    (Some(x), Some(y)) => Ok((BigUint::from_bytes_be(x), BigUint::from_bytes_be(y))),
                    _ => Err(ec_error("ec public key", "public key is the identity")),
                }
            }

            fn parts_from_secret(secret: &SecretKey) -> CryptoResult<EcKeyParts> {
                let (x, y) = public_parts(&secret.public_key())?;
                let d = Zeroizing::new(secret.to_bytes().to_vec());
                Ok(EcKeyParts {
                    d: Some(BigUint::from_bytes_be(&d)),
                    x,
                    y,
                })
            }

            pub(super) fn generate<R: CryptoRngCore>(rng: &mut R) -> CryptoResult<EcKeyParts> {
                parts_from_secret(&SecretKey::random(rng))
            }

            pub(super) fn from_pkcs8(der: &[u8]) -> CryptoResult<EcKeyParts> {
                let secret = SecretKey::from_pkcs8_der(der).map_err(|e| {
                    CryptoError::invalid_request(
                        "parse ec private key",
                        &e.to_string(),
                        error_codes::IMPORT_PARSE_FAILED,
                    )
                })?;
                parts_from_secret(&secret)
            }

            pub(super) fn from_spki(der: &[u8]) -> CryptoResult<EcKeyParts> {
                let public = PublicKey::from_public_key_der(der).map_err(|e| {
                    CryptoError::invalid_request(
                        "parse ec public key",
                        &e.to_string(),
                        error_codes::IMPORT_PARSE_FAILED,
                    )
                })?;
                let (x, y) = public_parts(&public)?;
                Ok(EcKeyParts { d: None, x, y })
            }

            pub(super) fn public_key_pem(sec1: &[u8]) -> CryptoResult<String> {
                let public = PublicKey::from_sec1_bytes(sec1).map_err(|e| ec_error("ec public key", e))?;
                public
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| ec_error("ec public key", e))
            }

            pub(super) fn public_key_der(sec1: &[u8]) -> CryptoResult<Vec<u8>> {
                let public = PublicKey::from_sec1_bytes(sec1).map_err(|e| ec_error("ec public key", e))?;
                public
                    .to_public_key_der()
                    .map(|doc| doc.as_bytes().to_vec())
                    .map_err(|e| ec_error("ec public key", e))
            }

            pub(super) fn private_key_pkcs8(d: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
                let secret = SecretKey::from_slice(d).map_err(|e| ec_error("ec private key", e))?;
                let doc = secret
                    .to_pkcs8_der()
                    .map_err(|e| ec_error("ec private key", e))?;
                Ok(Zeroizing::new(doc.as_bytes().to_vec()))
            }

            pub(super) fn sign_prehash(d: &[u8], prehash: &[u8]) -> CryptoResult<Vec<u8>> {
                let signer = SigningKey::from_slice(d).map_err(|e| ec_error("ecdsa sign", e))?;
                let signature: Signature = signer
                    .sign_prehash(prehash)
                    .map_err(|e| ec_error("ecdsa sign", e))?;
                Ok(signature.to_bytes().to_vec())
            }

            pub(super) fn verify_prehash(sec1: &[u8], prehash: &[u8], fixed: &[u8]) -> bool {
                let verifier = match VerifyingKey::from_sec1_bytes(sec1) {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                let signature = match Signature::from_slice(fixed) {
                    Ok(s) => s,
                    Err(_) => return false,
                };
                verifier.verify_prehash(prehash, &signature).is_ok()
            }
        }
    };
}

curve_ops!(nist_p256, p256);
curve_ops!(nist_p384, p384);
curve_ops!(nist_p521, p521);

impl Curve {
    pub fn from_key_type(key_type: KeyType) -> Option<Self> {
        match key_type {
            KeyType::EcdsaP256 => Some(Curve::P256),
            KeyType::EcdsaP384 => Some(Curve::P384),
            KeyType::EcdsaP521 => Some(Curve::P521),
            _ => None,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == OID_P256 {
            Some(Curve::P256)
        } else if *oid == OID_P384 {
            Some(Curve::P384)
        } else if *oid == OID_P521 {
            Some(Curve::P521)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
        }
    }

    /// Width of a scalar or coordinate in bytes
    pub fn field_bytes(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// Uncompressed SEC1 encoding of `(x, y)`
    pub fn sec1_point(self, x: &BigUint, y: &BigUint) -> Vec<u8> {
        let width = self.field_bytes();
        let mut out = Vec::with_capacity(1 + 2 * width);
        out.push(0x04);
        out.extend_from_slice(&fixed_width(x, width));
        out.extend_from_slice(&fixed_width(y, width));
        out
    }

    pub fn generate<R: CryptoRngCore>(self, rng: &mut R) -> CryptoResult<EcKeyParts> {
        match self {
            Curve::P256 => nist_p256::generate(rng),
            Curve::P384 => nist_p384::generate(rng),
            Curve::P521 => nist_p521::generate(rng),
        }
    }

    pub fn parse_pkcs8(self, der: &[u8]) -> CryptoResult<EcKeyParts> {
        match self {
            Curve::P256 => nist_p256::from_pkcs8(der),
            Curve::P384 => nist_p384::from_pkcs8(der),
            Curve::P521 => nist_p521::from_pkcs8(der),
        }
    }

    pub fn parse_spki(self, der: &[u8]) -> CryptoResult<EcKeyParts> {
        match self {
            Curve::P256 => nist_p256::from_spki(der),
            Curve::P384 => nist_p384::from_spki(der),
            Curve::P521 => nist_p521::from_spki(der),
        }
    }

    pub fn public_key_pem(self, x: &BigUint, y: &BigUint) -> CryptoResult<String> {
        let sec1 = self.sec1_point(x, y);
        match self {
            Curve::P256 => nist_p256::public_key_pem(&sec1),
            Curve::P384 => nist_p384::public_key_pem(&sec1),
            Curve::P521 => nist_p521::public_key_pem(&sec1),
        }
    }

    pub fn public_key_der(self, x: &BigUint, y: &BigUint) -> CryptoResult<Vec<u8>> {
        let sec1 = self.sec1_point(x, y);
        match self {
            Curve::P256 => nist_p256::public_key_der(&sec1),
            Curve::P384 => nist_p384::public_key_der(&sec1),
            Curve::P521 => nist_p521::public_key_der(&sec1),
        }
    }

    pub fn private_key_pkcs8(self, d: &BigUint) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let d = Zeroizing::new(fixed_width(d, self.field_bytes()));
        match self {
            Curve::P256 => nist_p256::private_key_pkcs8(&d),
            Curve::P384 => nist_p384::private_key_pkcs8(&d),
            Curve::P521 => nist_p521::private_key_pkcs8(&d),
        }
    }

    /// Sign a digest, returning fixed-width `r || s`.
    pub fn sign_prehash(self, d: &BigUint, prehash: &[u8]) -> CryptoResult<Vec<u8>> {
        let d = Zeroizing::new(fixed_width(d, self.field_bytes()));
        let prehash = self.widen_prehash(prehash);
        match self {
            Curve::P256 => nist_p256::sign_prehash(&d, &prehash),
            Curve::P384 => nist_p384::sign_prehash(&d, &prehash),
            Curve::P521 => nist_p521::sign_prehash(&d, &prehash),
        }
    }

    /// Verify fixed-width `r || s` over a digest.
    pub fn verify_prehash(self, x: &BigUint, y: &BigUint, prehash: &[u8], fixed: &[u8]) -> bool {
        let sec1 = self.sec1_point(x, y);
        let prehash = self.widen_prehash(prehash);
        match self {
            Curve::P256 => nist_p256::verify_prehash(&sec1, &prehash, fixed),
            Curve::P384 => nist_p384::verify_prehash(&sec1, &prehash, fixed),
            Curve::P521 => nist_p521::verify_prehash(&sec1, &prehash, fixed),
        }
    }

    /// Digests shorter than half the field size are rejected by the curve
    /// crates. Left-padding with zeros keeps the integer value, so a
    /// SHA-256 digest still signs under P-521.
    fn widen_prehash(self, prehash: &[u8]) -> Vec<u8> {
        let width = self.field_bytes();
        if prehash.len() >= width / 2 {
            return prehash.to_vec();
        }
        let mut out = vec![0u8; width - prehash.len()];
        out.extend_from_slice(prehash);
        out
    }
}

/// DER `SEQUENCE { INTEGER r, INTEGER s }` from fixed-width `r || s`
pub(crate) fn encode_asn1_signature(fixed: &[u8]) -> CryptoResult<Vec<u8>> {
    let half = fixed.len() / 2;
    let encode = || -> der::Result<Vec<u8>> {
        let r = UintRef::new(&fixed[..half])?;
        let s = UintRef::new(&fixed[half..])?;
        let body = (r.encoded_len()? + s.encoded_len()?)?;
        let mut out = Vec::new();
        Header::new(Tag::Sequence, body)?.encode_to_vec(&mut out)?;
        r.encode_to_vec(&mut out)?;
        s.encode_to_vec(&mut out)?;
        Ok(out)
    };
    encode().map_err(|e| ec_error("ecdsa sign", e))
}

/// Parse a DER ECDSA signature into fixed-width `r || s` for `curve`.
pub(crate) fn decode_asn1_signature(curve: Curve, sig: &[u8]) -> CryptoResult<Vec<u8>> {
    let malformed = || {
        CryptoError::invalid_request(
            "verify",
            "supplied signature is invalid",
            error_codes::SIGNATURE_MALFORMED,
        )
    };

    let mut reader = SliceReader::new(sig).map_err(|_| malformed())?;
    let (r, s) = reader
        .sequence(|seq| {
            let r = UintRef::decode(seq)?;
            let s = UintRef::decode(seq)?;
            Ok((r.as_bytes().to_vec(), s.as_bytes().to_vec()))
        })
        .map_err(|_| malformed())?;
    if !reader.is_finished() {
        return Err(CryptoError::invalid_request(
            "verify",
            "supplied signature contains extra data",
            error_codes::SIGNATURE_MALFORMED,
        ));
    }

    let width = curve.field_bytes();
    if r.len() > width || s.len() > width {
        return Err(malformed());
    }
    let mut fixed = fixed_width(&BigUint::from_bytes_be(&r), width);
    fixed.extend_from_slice(&fixed_width(&BigUint::from_bytes_be(&s), width));
    Ok(fixed)
}
