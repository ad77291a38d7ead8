use super::*;

use std::str::FromStr;
use std::time::Duration;

use der::asn1::{BitString, ObjectIdentifier, OctetString};
use der::oid::AssociatedOid;
use der::{Decode, DecodePem, Encode};
use ed25519_dalek::Verifier;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::certificate::{TbsCertificate, Version as CertificateVersion};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::aead::{AeadCipher, AeadProvider};
use crate::error::{error_codes, CryptoError, CryptoResult};
use crate::storage::{InmemStorage, Storage};

fn rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

fn new_policy(storage: &InmemStorage, config: PolicyConfig) -> Policy {
    let mut policy = Policy::new(config);
    policy.rotate(storage, &mut rng(7)).unwrap();
    policy
}

fn aes_policy(storage: &InmemStorage) -> Policy {
    new_policy(storage, PolicyConfig::new("test", KeyType::Aes256Gcm96))
}

fn b64(data: &[u8]) -> String {
    base64::encode(data)
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let storage = InmemStorage::new();
    let policy = aes_policy(&storage);
    let opts = EncryptOptions::default();

    let ciphertext = policy.encrypt(0, &b64(b"hello"), &opts).unwrap();
    assert!(ciphertext.starts_with("vault:v1:"));
    assert_eq!(policy.decrypt(&ciphertext, &opts).unwrap(), b64(b"hello"));

    // Random nonces make repeated encryptions differ
    let again = policy.encrypt(0, &b64(b"hello"), &opts).unwrap();
    assert_ne!(ciphertext, again);
}

#[test]
fn test_decrypt_rejects_future_version() {
    let storage = InmemStorage::new();
    let policy = aes_policy(&storage);
    let opts = EncryptOptions::default();

    let ciphertext = policy.encrypt(0, &b64(b"hello"), &opts).unwrap();
    let forged = ciphertext.replacen("vault:v1:", "vault:v2:", 1);
    let err = policy.decrypt(&forged, &opts).unwrap_err();
    match err {
        CryptoError::InvalidRequest { cause, .. } => assert!(cause.contains("too new")),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_decrypt_tampered_ciphertext() {
    let storage = InmemStorage::new();
    let policy = aes_policy(&storage);
    let opts = EncryptOptions::default();

    let ciphertext = policy.encrypt(0, &b64(b"hello"), &opts).unwrap();
    let payload = ciphertext.strip_prefix("vault:v1:").unwrap();
    let mut raw = base64::decode(payload).unwrap();
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    let tampered = format!("vault:v1:{}", b64(&raw));

    assert!(matches!(
        policy.decrypt(&tampered, &opts),
        Err(CryptoError::AuthenticationFailure { .. })
    ));
}

#[test]
fn test_associated_data() {
    let storage = InmemStorage::new();
    let policy = aes_policy(&storage);

    let with_ad = EncryptOptions::default().with_associated_data(b"header");
    let ciphertext = policy.encrypt(0, &b64(b"payload"), &with_ad).unwrap();
    assert_eq!(policy.decrypt(&ciphertext, &with_ad).unwrap(), b64(b"payload"));

    let wrong_ad = EncryptOptions::default().with_associated_data(b"other");
    assert!(policy.decrypt(&ciphertext, &wrong_ad).is_err());
}

#[test]
fn test_archive_and_restore() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    let mut rng = rng(11);
    for _ in 1..10 {
        policy.rotate(&storage, &mut rng).unwrap();
    }
    assert_eq!(policy.latest_version, 10);
    assert_eq!(policy.keys.len(), 10);

    let opts = EncryptOptions::default();
    let old = policy.encrypt(1, &b64(b"first"), &opts).unwrap();

    policy.min_decryption_version = 7;
    policy.persist(&storage).unwrap();
    assert_eq!(policy.keys.keys().copied().collect::<Vec<_>>(), vec![7, 8, 9, 10]);

    let archive = policy.load_archive(&storage).unwrap();
    assert_eq!(archive.keys.len(), 11);
    assert_eq!(policy.archive_version, 10);

    assert!(matches!(
        policy.decrypt(&old, &opts),
        Err(CryptoError::TooOld { version: 1 })
    ));

    policy.min_decryption_version = 1;
    policy.persist(&storage).unwrap();
    assert_eq!(policy.keys.len(), 10);
    assert_eq!(policy.decrypt(&old, &opts).unwrap(), b64(b"first"));
}

#[test]
fn test_rotate_rolls_back_on_storage_failure() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    let before = policy.keys.get(&1).unwrap().key.clone();

    storage.set_fail_put(true);
    assert!(policy.rotate(&storage, &mut rng(3)).is_err());
    assert_eq!(policy.latest_version, 1);
    assert_eq!(policy.keys.len(), 1);
    assert_eq!(policy.keys.get(&1).unwrap().key, before);

    storage.set_fail_put(false);
    policy.rotate(&storage, &mut rng(3)).unwrap();
    assert_eq!(policy.latest_version, 2);
}

#[test]
fn test_rotate_failure_keeps_convergent_version() {
    let storage = InmemStorage::new();
    let config = PolicyConfig {
        derived: true,
        kdf: Kdf::HkdfSha256,
        convergent_encryption: true,
        ..PolicyConfig::new("convergent-rollback", KeyType::Aes256Gcm96)
    };
    let mut policy = new_policy(&storage, config);
    policy.convergent_version = 2;

    storage.set_fail_put(true);
    assert!(policy.rotate(&storage, &mut rng(8)).is_err());
    assert_eq!(policy.convergent_version, 2);
    assert_eq!(policy.latest_version, 1);
    assert!(!policy.keys.contains_key(&2));

    storage.set_fail_put(false);
    policy.rotate(&storage, &mut rng(8)).unwrap();
    assert_eq!(policy.convergent_version, 2);
    assert_eq!(policy.convergent_version_for(2), CURRENT_CONVERGENT_VERSION);
}

#[test]
fn test_upgrade_fails_without_latest_entry() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    policy.rotate(&storage, &mut rng(4)).unwrap();
    policy.keys.remove(&2);
    assert!(policy.needs_upgrade());

    let err = policy.upgrade(&storage, &mut rng(4)).unwrap_err();
    assert_eq!(err.error_type(), "Internal");
    assert_eq!(err.error_code(), error_codes::POLICY_UPGRADE_FAILED);
    assert_eq!(policy.latest_version, 2);
    assert_eq!(policy.keys.len(), 1);
    assert!(policy.keys.contains_key(&1));
}

#[test]
fn test_legacy_key_upgrade() {
    let storage = InmemStorage::new();
    let mut policy = Policy::new(PolicyConfig::new("legacy", KeyType::Aes256Gcm96));
    policy.legacy_key = zeroize::Zeroizing::new(vec![0x11; 32]);
    assert!(policy.needs_upgrade());

    // Failed upgrade leaves the legacy layout in place
    storage.set_fail_put(true);
    assert!(policy.upgrade(&storage, &mut rng(5)).is_err());
    assert_eq!(*policy.legacy_key, vec![0x11; 32]);
    assert!(policy.keys.is_empty());
    assert_eq!(policy.latest_version, 0);

    storage.set_fail_put(false);
    policy.upgrade(&storage, &mut rng(5)).unwrap();
    assert!(policy.legacy_key.is_empty());
    assert_eq!(policy.latest_version, 1);
    assert_eq!(policy.min_decryption_version, 1);
    assert_eq!(*policy.keys.get(&1).unwrap().key, vec![0x11; 32]);
    assert!(!policy.keys.get(&1).unwrap().hmac_key.is_empty());
    assert!(!policy.needs_upgrade());

    let snapshot = policy.to_json().unwrap();
    policy.upgrade(&storage, &mut rng(6)).unwrap();
    assert_eq!(policy.to_json().unwrap(), snapshot);

    // Pre-versioning envelopes carry version 0
    let ciphertext = policy.encrypt(1, &b64(b"old"), &EncryptOptions::default()).unwrap();
    let legacy = ciphertext.replacen("vault:v1:", "vault:v0:", 1);
    assert_eq!(policy.decrypt(&legacy, &EncryptOptions::default()).unwrap(), b64(b"old"));
}

#[test]
fn test_convergent_encryption_is_deterministic() {
    let storage = InmemStorage::new();
    let config = PolicyConfig {
        derived: true,
        kdf: Kdf::HkdfSha256,
        convergent_encryption: true,
        ..PolicyConfig::new("convergent", KeyType::Aes256Gcm96)
    };
    let policy = new_policy(&storage, config);
    assert_eq!(policy.convergent_version_for(1), CURRENT_CONVERGENT_VERSION);

    let opts = EncryptOptions::default().with_context(b"tenant-a");
    let first = policy.encrypt(0, &b64(b"same input"), &opts).unwrap();
    let second = policy.encrypt(0, &b64(b"same input"), &opts).unwrap();
    assert_eq!(first, second);

    let other_context = EncryptOptions::default().with_context(b"tenant-b");
    assert_ne!(first, policy.encrypt(0, &b64(b"same input"), &other_context).unwrap());
    assert_eq!(policy.decrypt(&first, &opts).unwrap(), b64(b"same input"));

    let nonce = [0u8; 12];
    let with_nonce = opts.with_nonce(&nonce);
    assert!(policy.encrypt(0, &b64(b"same input"), &with_nonce).is_err());
}

#[test]
fn test_convergent_v1_requires_caller_nonce() {
    let storage = InmemStorage::new();
    let mut policy = Policy::new(PolicyConfig {
        derived: true,
        kdf: Kdf::HkdfSha256,
        convergent_encryption: true,
        ..PolicyConfig::new("convergent-v1", KeyType::Aes256Gcm96)
    });
    policy.convergent_version = 1;
    policy.rotate(&storage, &mut rng(9)).unwrap();
    assert_eq!(policy.convergent_version_for(1), 1);

    let nonce = [7u8; 12];
    let opts = EncryptOptions::default().with_context(b"ctx").with_nonce(&nonce);
    let ciphertext = policy.encrypt(0, &b64(b"data"), &opts).unwrap();
    assert_eq!(ciphertext, policy.encrypt(0, &b64(b"data"), &opts).unwrap());
    assert_eq!(policy.decrypt(&ciphertext, &opts).unwrap(), b64(b"data"));

    let no_nonce = EncryptOptions::default().with_context(b"ctx");
    assert!(policy.decrypt(&ciphertext, &no_nonce).is_err());
    assert!(policy.encrypt(0, &b64(b"data"), &no_nonce.with_nonce(&[1u8; 4])).is_err());
}

#[test]
fn test_derived_key_requires_context() {
    let storage = InmemStorage::new();
    let policy = new_policy(
        &storage,
        PolicyConfig {
            derived: true,
            kdf: Kdf::HkdfSha256,
            ..PolicyConfig::new("derived", KeyType::ChaCha20Poly1305)
        },
    );
    assert!(policy.encrypt(0, &b64(b"x"), &EncryptOptions::default()).is_err());

    let a = policy.get_key(b"a", 1, 32).unwrap();
    let b = policy.get_key(b"b", 1, 32).unwrap();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
    assert_eq!(a, policy.get_key(b"a", 1, 32).unwrap());
}

#[test]
fn test_ed25519_sign_verify() {
    let storage = InmemStorage::new();
    let policy = new_policy(&storage, PolicyConfig::new("ed", KeyType::Ed25519));
    let opts = SigningOptions::default();

    let signed = policy.sign(0, b"message", &opts).unwrap();
    assert!(signed.signature.starts_with("vault:v1:"));
    assert!(policy.verify_signature(b"message", &signed.signature, &opts).unwrap());
    assert!(!policy.verify_signature(b"other", &signed.signature, &opts).unwrap());

    let sha512 = opts.with_hash(HashType::Sha2_512);
    assert!(policy.sign(0, b"message", &sha512).is_err());
}

#[test]
fn test_derived_ed25519_uses_context() {
    let storage = InmemStorage::new();
    let policy = new_policy(
        &storage,
        PolicyConfig {
            derived: true,
            kdf: Kdf::HkdfSha256,
            ..PolicyConfig::new("ed-derived", KeyType::Ed25519)
        },
    );

    let alice = SigningOptions::default().with_context(b"alice");
    let bob = SigningOptions::default().with_context(b"bob");
    let signed = policy.sign(0, b"message", &alice).unwrap();
    assert_eq!(signed.public_key.len(), 32);

    assert!(policy.verify_signature(b"message", &signed.signature, &alice).unwrap());
    assert!(!policy.verify_signature(b"message", &signed.signature, &bob).unwrap());
    assert_ne!(signed.public_key, policy.sign(0, b"message", &bob).unwrap().public_key);
}

#[test]
fn test_ecdsa_marshaling() {
    let storage = InmemStorage::new();
    let digest = HashType::Sha2_256.digest(b"ecdsa input").unwrap();

    for key_type in [KeyType::EcdsaP256, KeyType::EcdsaP384, KeyType::EcdsaP521] {
        let policy = new_policy(&storage, PolicyConfig::new(key_type.as_str(), key_type));

        let asn1 = SigningOptions::default();
        let signed = policy.sign(0, &digest, &asn1).unwrap();
        assert!(policy.verify_signature(&digest, &signed.signature, &asn1).unwrap());

        let jws = SigningOptions::default().with_marshaling(MarshalingType::Jws);
        let signed = policy.sign(0, &digest, &jws).unwrap();
        let payload = signed.signature.strip_prefix("vault:v1:").unwrap();
        assert!(!payload.contains('='));
        assert!(policy.verify_signature(&digest, &signed.signature, &jws).unwrap());

        let other = HashType::Sha2_256.digest(b"something else").unwrap();
        assert!(!policy.verify_signature(&other, &signed.signature, &jws).unwrap());
    }
}

#[test]
fn test_rsa_operations() {
    let storage = InmemStorage::new();
    let policy = new_policy(&storage, PolicyConfig::new("rsa", KeyType::Rsa2048));
    let digest = HashType::Sha2_256.digest(b"rsa input").unwrap();

    let pss = SigningOptions::default();
    let signed = policy.sign(0, &digest, &pss).unwrap();
    assert!(policy.verify_signature(&digest, &signed.signature, &pss).unwrap());

    // Auto salt on verify accepts a signature made with the hash-size salt
    let equals_hash = pss.with_salt_length(SaltLength::EqualsHash);
    let signed = policy.sign(0, &digest, &equals_hash).unwrap();
    assert!(policy.verify_signature(&digest, &signed.signature, &pss).unwrap());

    assert!(policy
        .sign(0, &digest, &pss.with_salt_length(SaltLength::Explicit(4096)))
        .is_err());

    let pkcs1 = SigningOptions::default().with_signature_algorithm(SignatureAlgorithm::Pkcs1v15);
    let signed = policy.sign(0, &digest, &pkcs1).unwrap();
    assert!(policy.verify_signature(&digest, &signed.signature, &pkcs1).unwrap());
    assert!(!policy.verify_signature(&digest, &signed.signature, &pss).unwrap());

    for padding in [PaddingScheme::Oaep, PaddingScheme::Pkcs1v15] {
        let opts = EncryptOptions::default().with_padding_scheme(padding);
        let ciphertext = policy.encrypt(0, &b64(b"secret"), &opts).unwrap();
        assert_eq!(policy.decrypt(&ciphertext, &opts).unwrap(), b64(b"secret"));
    }

    let with_ad = EncryptOptions::default().with_associated_data(b"ad");
    assert!(policy.encrypt(0, &b64(b"secret"), &with_ad).is_err());

    // Key wrapping to the policy's RSA key
    let target = [0x5Au8; 32];
    let blob = policy
        .wrap_key(0, &target, KeyType::Aes256Gcm96, HashType::Sha2_256)
        .unwrap();
    let private = policy.keys.get(&1).unwrap().rsa_private.as_ref().unwrap();
    let unwrapped = unwrap_key(private, &blob, HashType::Sha2_256).unwrap();
    assert_eq!(&unwrapped[..], &target[..]);

    assert!(policy
        .wrap_key(0, b"not pkcs8", KeyType::EcdsaP256, HashType::Sha2_256)
        .is_err());
}

#[test]
fn test_hmac() {
    let storage = InmemStorage::new();
    let policy = new_policy(
        &storage,
        PolicyConfig {
            key_size: 32,
            ..PolicyConfig::new("hmac", KeyType::Hmac)
        },
    );

    let tag = policy.hmac(0, HashType::Sha2_256, b"data").unwrap();
    assert!(tag.starts_with("vault:v1:"));
    assert!(policy.verify_hmac(b"data", HashType::Sha2_256, &tag).unwrap());
    assert!(!policy.verify_hmac(b"datb", HashType::Sha2_256, &tag).unwrap());

    let sha3 = policy.hmac(0, HashType::Sha3_384, b"data").unwrap();
    assert_ne!(tag, sha3);
    assert!(policy.hmac(2, HashType::Sha2_256, b"data").is_err());
    assert!(policy.hmac_key(-1).is_err());

    // Non-HMAC types carry a separate HMAC key
    let aes = aes_policy(&storage);
    let tag = aes.hmac(0, HashType::Sha2_512, b"data").unwrap();
    assert!(aes.verify_hmac(b"data", HashType::Sha2_512, &tag).unwrap());
}

#[test]
fn test_hmac_key_size_bounds() {
    let mut policy = Policy::new(PolicyConfig {
        key_size: 16,
        ..PolicyConfig::new("hmac", KeyType::Hmac)
    });
    assert!(policy.rotate_in_memory(&mut rng(1)).is_err());
    policy.key_size = 512;
    policy.rotate_in_memory(&mut rng(1)).unwrap();
    assert_eq!(policy.keys.get(&1).unwrap().key.len(), 512);
}

#[test]
fn test_cmac_known_answer() {
    let storage = InmemStorage::new();
    let mut policy = Policy::new(PolicyConfig::new("cmac", KeyType::Aes128Cmac));
    let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
    policy.import(&storage, &key, &mut rng(2)).unwrap();

    let tag = policy.cmac(0, b"", 0).unwrap();
    let payload = tag.strip_prefix("vault:v1:").unwrap();
    assert_eq!(
        hex::encode(base64::decode(payload).unwrap()),
        "bb1d6929e95937287fa37d129b756746"
    );
    assert!(policy.verify_cmac(b"", &tag).unwrap());

    let short = policy.cmac(0, b"abc", 8).unwrap();
    assert_eq!(base64::decode(short.strip_prefix("vault:v1:").unwrap()).unwrap().len(), 8);
    assert!(policy.verify_cmac(b"abc", &short).unwrap());
    assert!(!policy.verify_cmac(b"abd", &short).unwrap());

    assert!(policy.cmac(0, b"abc", CMAC_MAX_LENGTH + 1).is_err());
    assert!(policy.hmac(0, HashType::Sha2_256, b"abc").is_err());
    assert!(aes_policy(&storage).cmac_key(1).is_err());
}

#[test]
fn test_import_symmetric_key() {
    let storage = InmemStorage::new();
    let mut policy = Policy::new(PolicyConfig::new("imported", KeyType::Aes256Gcm96));

    assert!(policy.import(&storage, &[0u8; 16], &mut rng(4)).is_err());
    assert_eq!(policy.latest_version, 0);

    policy.import(&storage, &[0x42; 32], &mut rng(4)).unwrap();
    assert!(policy.imported);
    assert_eq!(policy.latest_version, 1);
    assert!(storage.contains(&policy.storage_path()));

    let err = policy.rotate(&storage, &mut rng(4)).unwrap_err();
    assert!(matches!(err, CryptoError::NotAllowed { .. }));

    policy.allow_imported_key_rotation = true;
    policy.rotate(&storage, &mut rng(4)).unwrap();
    assert_eq!(policy.latest_version, 2);
    assert!(!policy.imported);
}

#[test]
fn test_import_public_then_private_ecdsa() {
    use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    let storage = InmemStorage::new();
    let mut policy = Policy::new(PolicyConfig::new("ec-import", KeyType::EcdsaP256));
    let secret = p256::SecretKey::random(&mut rng(8));
    let public_pem = secret.public_key().to_public_key_pem(LineEnding::LF).unwrap();
    let private_der = secret.to_pkcs8_der().unwrap();

    policy
        .import_public_or_private(&storage, public_pem.as_bytes(), false, &mut rng(8))
        .unwrap();
    assert!(policy.keys.get(&1).unwrap().is_private_key_missing());

    let digest = HashType::Sha2_256.digest(b"x").unwrap();
    assert!(policy.sign(0, &digest, &SigningOptions::default()).is_err());
    assert!(policy.key_version_can_be_updated(1, true).is_ok());

    // The private half folds into the existing version
    policy.import(&storage, private_der.as_bytes(), &mut rng(8)).unwrap();
    assert_eq!(policy.latest_version, 1);
    assert!(!policy.keys.get(&1).unwrap().is_private_key_missing());
    assert!(policy.key_version_can_be_updated(1, true).is_err());

    let signed = policy.sign(0, &digest, &SigningOptions::default()).unwrap();
    assert!(policy
        .verify_signature(&digest, &signed.signature, &SigningOptions::default())
        .unwrap());
}

#[test]
fn test_import_rejects_mismatched_types() {
    use p256::pkcs8::EncodePrivateKey;

    let storage = InmemStorage::new();
    let secret = p256::SecretKey::random(&mut rng(12));
    let der = secret.to_pkcs8_der().unwrap();

    let mut p384 = Policy::new(PolicyConfig::new("p384", KeyType::EcdsaP384));
    assert!(p384.import(&storage, der.as_bytes(), &mut rng(12)).is_err());

    let mut ed = Policy::new(PolicyConfig::new("ed", KeyType::Ed25519));
    assert!(ed.import(&storage, der.as_bytes(), &mut rng(12)).is_err());

    let mut ec = Policy::new(PolicyConfig::new("ec", KeyType::EcdsaP256));
    assert!(ec
        .import_public_or_private(&storage, b"not a pem", false, &mut rng(12))
        .is_err());
    assert_eq!(ec.latest_version, 0);
}

#[test]
fn test_create_csr_ed25519() {
    let storage = InmemStorage::new();
    let policy = new_policy(&storage, PolicyConfig::new("csr", KeyType::Ed25519));

    let pem = policy.create_csr(0, "CN=example.com,O=Example").unwrap();
    assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

    let request = CertReq::from_pem(pem.as_bytes()).unwrap();
    assert!(request.info.subject.to_string().contains("CN=example.com"));

    let verifying = policy.keys.get(&1).unwrap().ed25519_verifying_key().unwrap();
    let signature = ed25519_dalek::Signature::from_slice(request.signature.raw_bytes()).unwrap();
    let tbs = request.info.to_der().unwrap();
    assert!(verifying.verify(&tbs, &signature).is_ok());

    let aes = aes_policy(&storage);
    assert!(aes.create_csr(0, "CN=nope").is_err());
}

#[test]
fn test_create_csr_ecdsa() {
    let storage = InmemStorage::new();
    let policy = new_policy(&storage, PolicyConfig::new("csr-ec", KeyType::EcdsaP384));
    let pem = policy.create_csr(1, "CN=ec.example.com").unwrap();
    let request = CertReq::from_pem(pem.as_bytes()).unwrap();
    assert_eq!(
        request.algorithm.oid,
        ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3")
    );
    assert!(policy.create_csr(2, "CN=ec.example.com").is_err());
}

fn unsigned_certificate(public_key_der: &[u8], ca: Option<bool>) -> Vec<u8> {
    let extensions = ca.map(|ca| {
        let constraints = BasicConstraints {
            ca,
            path_len_constraint: None,
        };
        vec![Extension {
            extn_id: BasicConstraints::OID,
            critical: true,
            extn_value: OctetString::new(constraints.to_der().unwrap()).unwrap(),
        }]
    });
    let algorithm = AlgorithmIdentifierOwned {
        oid: ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2"),
        parameters: None,
    };
    let certificate = Certificate {
        tbs_certificate: TbsCertificate {
            version: CertificateVersion::V3,
            serial_number: SerialNumber::new(&[1]).unwrap(),
            signature: algorithm.clone(),
            issuer: Name::from_str("CN=issuer").unwrap(),
            validity: Validity::from_now(Duration::from_secs(3600)).unwrap(),
            subject: Name::from_str("CN=subject").unwrap(),
            subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(public_key_der).unwrap(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions,
        },
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&[0u8; 64]).unwrap(),
    };
    certificate.to_der().unwrap()
}

#[test]
fn test_certificate_chain() {
    let storage = InmemStorage::new();
    let mut policy = new_policy(&storage, PolicyConfig::new("chain", KeyType::EcdsaP256));
    let own_key = policy.keys.get(&1).unwrap().public_key_der(KeyType::EcdsaP256).unwrap();
    let mut stranger = Policy::new(PolicyConfig::new("stranger", KeyType::EcdsaP256));
    stranger.rotate(&storage, &mut rng(99)).unwrap();
    let other_key = stranger.keys.get(&1).unwrap().public_key_der(KeyType::EcdsaP256).unwrap();

    assert!(policy
        .validate_and_persist_certificate_chain(&storage, 1, &[])
        .is_err());

    let ca_leaf = unsigned_certificate(&own_key, Some(true));
    assert!(policy
        .validate_and_persist_certificate_chain(&storage, 1, &[ca_leaf])
        .is_err());

    let leaf = unsigned_certificate(&own_key, Some(false));
    let second_leaf = unsigned_certificate(&other_key, Some(false));
    assert!(policy
        .validate_and_persist_certificate_chain(&storage, 1, &[leaf.clone(), second_leaf])
        .is_err());

    let foreign = unsigned_certificate(&other_key, None);
    assert!(policy
        .validate_and_persist_certificate_chain(&storage, 1, &[foreign])
        .is_err());
    assert!(policy.keys.get(&1).unwrap().certificate_chain.is_empty());

    let issuer = unsigned_certificate(&other_key, Some(true));
    policy
        .validate_and_persist_certificate_chain(&storage, 1, &[leaf.clone(), issuer])
        .unwrap();
    assert_eq!(policy.keys.get(&1).unwrap().certificate_chain.len(), 2);

    let stored = storage.get(&policy.storage_path()).unwrap().unwrap();
    let reloaded = Policy::from_json(&stored).unwrap();
    assert_eq!(reloaded.keys.get(&1).unwrap().certificate_chain[0], leaf);
}

#[test]
fn test_backup_and_decode() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    assert!(matches!(
        policy.backup(&storage),
        Err(CryptoError::NotAllowed { .. })
    ));

    policy.exportable = true;
    policy.allow_plaintext_backup = true;
    policy.rotate(&storage, &mut rng(13)).unwrap();
    let ciphertext = policy.encrypt(1, &b64(b"kept"), &EncryptOptions::default()).unwrap();

    let blob = policy.backup(&storage).unwrap();
    assert_eq!(policy.backup_info.as_ref().unwrap().version, 2);

    let data = Policy::decode_backup(&blob).unwrap();
    assert_eq!(data.policy.name, "test");
    assert_eq!(data.policy.latest_version, 2);
    assert_eq!(data.archived_keys.keys.len(), 3);
    assert_eq!(
        data.policy.decrypt(&ciphertext, &EncryptOptions::default()).unwrap(),
        b64(b"kept")
    );
}

#[test]
fn test_custom_version_template() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    policy.set_version_template("key-{{version}}:");

    let ciphertext = policy.encrypt(0, &b64(b"x"), &EncryptOptions::default()).unwrap();
    assert!(ciphertext.starts_with("key-1:"));
    assert_eq!(policy.decrypt(&ciphertext, &EncryptOptions::default()).unwrap(), b64(b"x"));

    policy.set_version_template("key-v{{version}}");
    let ciphertext = policy.encrypt(0, &b64(b"x"), &EncryptOptions::default()).unwrap();
    match policy.decrypt(&ciphertext, &EncryptOptions::default()) {
        Err(CryptoError::InvalidRequest { cause, .. }) => {
            assert!(cause.contains("wrong number of fields"))
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }

    policy.set_version_template("no placeholder");
    assert!(policy.template_parts().is_err());
}

#[test]
fn test_json_roundtrip() {
    let storage = InmemStorage::new();
    let mut policy = new_policy(&storage, PolicyConfig::new("json", KeyType::EcdsaP521));
    policy.rotate(&storage, &mut rng(14)).unwrap();
    let digest = HashType::Sha2_512.digest(b"payload").unwrap();
    let signed = policy.sign(1, &digest, &SigningOptions::default()).unwrap();

    let raw = policy.to_json().unwrap();
    let reloaded = Policy::from_json(&raw).unwrap();
    assert_eq!(reloaded.latest_version, 2);
    assert_eq!(reloaded.key_type, KeyType::EcdsaP521);
    assert_eq!(reloaded.public_keys(), policy.public_keys());
    assert!(reloaded
        .verify_signature(&digest, &signed.signature, &SigningOptions::default())
        .unwrap());
}

#[test]
fn test_deleted_policy_does_not_persist() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    policy.mark_deleted();
    assert!(policy.is_deleted());
    assert!(matches!(
        policy.rotate(&storage, &mut rng(15)),
        Err(CryptoError::NotAllowed { .. })
    ));
    assert_eq!(policy.latest_version, 1);
}

#[test]
fn test_min_encryption_version() {
    let storage = InmemStorage::new();
    let mut policy = aes_policy(&storage);
    policy.rotate(&storage, &mut rng(16)).unwrap();
    policy.min_encryption_version = 2;

    assert!(policy.encrypt(1, &b64(b"x"), &EncryptOptions::default()).is_err());
    assert!(policy.encrypt(3, &b64(b"x"), &EncryptOptions::default()).is_err());
    assert!(policy.encrypt(-1, &b64(b"x"), &EncryptOptions::default()).is_err());
    let ciphertext = policy.encrypt(0, &b64(b"x"), &EncryptOptions::default()).unwrap();
    assert!(ciphertext.starts_with("vault:v2:"));
}

/// Key system that keeps its keys in memory.
#[derive(Default)]
struct MemoryKeySystem {
    keys: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryKeySystem {
    fn key(&self, key_id: &str) -> CryptoResult<Vec<u8>> {
        self.keys
            .lock()
            .iter()
            .find(|(id, _)| id == key_id)
            .map(|(_, key)| key.clone())
            .ok_or_else(|| CryptoError::internal("managed", "unknown key", 0))
    }

    fn mac(&self, key_id: &str, input: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(&self.key(key_id)?).unwrap();
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl ManagedKeySystem for MemoryKeySystem {
    fn create_key(&self, managed_key_name: &str) -> CryptoResult<String> {
        let id = format!("{}-{}", managed_key_name, uuid::Uuid::new_v4());
        self.keys.lock().push((id.clone(), vec![0x24; 32]));
        Ok(id)
    }

    fn encrypt(&self, key_id: &str, plaintext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = AeadCipher::new(KeyType::Aes256Gcm96, &self.key(key_id)?)?;
        let mut out = cipher.generate_nonce();
        let sealed = cipher.seal(&out, plaintext, associated_data)?;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key_id: &str, ciphertext: &[u8], associated_data: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = AeadCipher::new(KeyType::Aes256Gcm96, &self.key(key_id)?)?;
        let (nonce, body) = ciphertext.split_at(cipher.nonce_size());
        cipher.open(nonce, body, associated_data)
    }

    fn sign(&self, key_id: &str, input: &[u8], _hash: HashType) -> CryptoResult<Vec<u8>> {
        self.mac(key_id, input)
    }

    fn verify(&self, key_id: &str, input: &[u8], signature: &[u8], _hash: HashType) -> CryptoResult<bool> {
        Ok(self.mac(key_id, input)? == signature)
    }
}

#[test]
fn test_managed_key_operations() {
    let storage = InmemStorage::new();
    let system = MemoryKeySystem::default();
    let mut policy = Policy::new(PolicyConfig::new("managed", KeyType::ManagedKey));

    assert!(policy.rotate(&storage, &mut rng(17)).is_err());
    policy.rotate_managed_key(&storage, "hsm", &system).unwrap();
    assert_eq!(policy.latest_version, 1);
    assert!(policy.keys.get(&1).unwrap().managed_key_uuid.starts_with("hsm-"));

    assert!(policy.encrypt(0, &b64(b"x"), &EncryptOptions::default()).is_err());

    let opts = EncryptOptions::default()
        .with_managed_keys(&system)
        .with_associated_data(b"ad");
    let ciphertext = policy.encrypt(0, &b64(b"managed secret"), &opts).unwrap();
    assert_eq!(policy.decrypt(&ciphertext, &opts).unwrap(), b64(b"managed secret"));

    let signing = SigningOptions::default().with_managed_keys(&system);
    let signed = policy.sign(0, b"digest", &signing).unwrap();
    assert!(policy.verify_signature(b"digest", &signed.signature, &signing).unwrap());
    assert!(!policy.verify_signature(b"other", &signed.signature, &signing).unwrap());

    assert!(policy.import(&storage, &[0u8; 32], &mut rng(17)).is_err());

    let mut aes = aes_policy(&storage);
    assert!(aes.rotate_managed_key(&storage, "hsm", &system).is_err());
}

#[test]
fn test_managed_key_with_aead_provider() {
    let storage = InmemStorage::new();
    let system = MemoryKeySystem::default();
    let mut policy = Policy::new(PolicyConfig::new("managed-aead", KeyType::ManagedKey));
    policy.rotate_managed_key(&storage, "hsm", &system).unwrap();

    let cipher = AeadCipher::new(KeyType::ChaCha20Poly1305, &[0x33; 32]).unwrap();
    let opts = EncryptOptions::default().with_aead_provider(&cipher);
    let ciphertext = policy.encrypt(0, &b64(b"via provider"), &opts).unwrap();
    assert_eq!(policy.decrypt(&ciphertext, &opts).unwrap(), b64(b"via provider"));
}
