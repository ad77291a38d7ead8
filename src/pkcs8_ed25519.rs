/*!
 * Legacy Ed25519 private key parsing
 *
 * Older toolchains (NSS in particular) emit Ed25519 private keys as an
 * ECPrivateKey structure, optionally wrapped in PKCS#8, that carries the
 * RFC 8032 seed and a curve OID of their own. Standard PKCS#8 decoders
 * reject these blobs, so import falls back to this parser.
 */

use der::asn1::ObjectIdentifier;
use der::Decode;
use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use pkcs8::PrivateKeyInfo;
use sec1::EcPrivateKey;

use crate::error::{error_codes, CryptoError, CryptoResult};

/// Ed25519 OID assigned under the GnuPG arc and used by NSS
pub const OID_NSS_PKIX_ED25519: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11591.15.1");

/// Curve OID accepted alongside the NSS one
pub const OID_RFC8410_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.110");

fn accepted(oid: &ObjectIdentifier) -> bool {
    *oid == OID_NSS_PKIX_ED25519 || *oid == OID_RFC8410_ED25519
}

fn parse_error(cause: &str) -> CryptoError {
    CryptoError::invalid_request(
        "parse ed25519 private key",
        cause,
        error_codes::IMPORT_PARSE_FAILED,
    )
}

/// Parse a legacy Ed25519 private key.
///
/// Accepts either PKCS#8 whose algorithm is one of the accepted Ed25519
/// OIDs and whose payload is an ECPrivateKey, or a bare ECPrivateKey whose
/// named curve is one of those OIDs. The seed must be exactly 32 bytes.
pub fn parse_pkcs8_ed25519_private_key(der_bytes: &[u8]) -> CryptoResult<SigningKey> {
    let mut inner = der_bytes;
    let mut checked_oid = false;

    if let Ok(info) = PrivateKeyInfo::from_der(der_bytes) {
        if !accepted(&info.algorithm.oid) {
            return Err(parse_error(&format!(
                "PKCS#8 wrapping contained private key with unknown algorithm: {}",
                info.algorithm.oid
            )));
        }
        checked_oid = true;
        inner = info.private_key;
    }

    let ec_key = EcPrivateKey::from_der(inner)
        .map_err(|e| parse_error(&format!("failed to parse EC private key: {}", e)))?;

    if !checked_oid {
        let curve = ec_key.parameters.and_then(|p| p.named_curve());
        match curve {
            Some(oid) if accepted(&oid) => {}
            Some(oid) => {
                return Err(parse_error(&format!("unknown curve OID {}", oid)));
            }
            None => return Err(parse_error("EC private key carries no curve OID")),
        }
    }

    let seed: [u8; SECRET_KEY_LENGTH] = ec_key.private_key.try_into().map_err(|_| {
        parse_error(&format!(
            "private key is invalid size; expected {} got {}",
            SECRET_KEY_LENGTH,
            ec_key.private_key.len()
        ))
    })?;

    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::asn1::OctetStringRef;
    use der::Encode;
    use pkcs8::AlgorithmIdentifierRef;
    use sec1::EcParameters;

    fn ec_private_key(seed: &[u8], curve: Option<ObjectIdentifier>) -> Vec<u8> {
        EcPrivateKey {
            private_key: seed,
            parameters: curve.map(EcParameters::NamedCurve),
            public_key: None,
        }
        .to_der()
        .unwrap()
    }

    fn wrap_pkcs8(oid: ObjectIdentifier, inner: &[u8]) -> Vec<u8> {
        PrivateKeyInfo {
            algorithm: AlgorithmIdentifierRef {
                oid,
                parameters: None,
            },
            private_key: inner,
            public_key: None,
        }
        .to_der()
        .unwrap()
    }

    #[test]
    fn test_bare_ec_private_key() {
        let seed = [5u8; 32];
        for oid in [OID_NSS_PKIX_ED25519, OID_RFC8410_ED25519] {
            let der = ec_private_key(&seed, Some(oid));
            let key = parse_pkcs8_ed25519_private_key(&der).unwrap();
            assert_eq!(key.to_bytes(), seed);
        }
    }

    #[test]
    fn test_pkcs8_wrapped() {
        let seed = [6u8; 32];
        let inner = ec_private_key(&seed, None);
        let der = wrap_pkcs8(OID_NSS_PKIX_ED25519, &inner);

        let key = parse_pkcs8_ed25519_private_key(&der).unwrap();
        assert_eq!(key.to_bytes(), seed);
        assert_eq!(key.verifying_key(), SigningKey::from_bytes(&seed).verifying_key());
    }

    #[test]
    fn test_rejects_other_curves() {
        let p256 = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
        let der = ec_private_key(&[1u8; 32], Some(p256));
        assert!(parse_pkcs8_ed25519_private_key(&der).is_err());

        let der = ec_private_key(&[1u8; 32], None);
        assert!(parse_pkcs8_ed25519_private_key(&der).is_err());

        let inner = ec_private_key(&[1u8; 32], None);
        let der = wrap_pkcs8(p256, &inner);
        assert!(parse_pkcs8_ed25519_private_key(&der).is_err());
    }

    #[test]
    fn test_rejects_wrong_seed_size() {
        let der = ec_private_key(&[1u8; 31], Some(OID_NSS_PKIX_ED25519));
        let err = parse_pkcs8_ed25519_private_key(&der).unwrap_err();
        assert_eq!(err.error_code(), error_codes::IMPORT_PARSE_FAILED);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_pkcs8_ed25519_private_key(b"not der").is_err());
        let octets = OctetStringRef::new(&[0u8; 32]).unwrap().to_der().unwrap();
        assert!(parse_pkcs8_ed25519_private_key(&octets).is_err());
    }
}
