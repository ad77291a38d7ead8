use super::*;
use crate::aead::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE};
use crate::error::{CryptoError, CryptoResult};

fn assert_rejected(result: CryptoResult<Vec<u8>>) {
    assert!(
        matches!(result, Err(CryptoError::AuthenticationFailure { .. })),
        "expected authentication failure, got {:?}",
        result
    );
}

#[test]
fn test_kem_dem_roundtrip() {
    let pair = generate_keypair().unwrap();
    let sealed = encrypt(&pair.public_key, b"Hello, quantum world", b"ctx").unwrap();

    assert_eq!(sealed.nonce.len(), AEAD_NONCE_SIZE);
    assert_eq!(sealed.ciphertext.len(), 20 + AEAD_TAG_SIZE);

    let opened = decrypt(&pair.secret_key, &sealed, b"ctx").unwrap();
    assert_eq!(opened, b"Hello, quantum world");
}

#[test]
fn test_kem_dem_fresh_capsule_each_call() {
    let pair = generate_keypair().unwrap();
    let a = encrypt(&pair.public_key, b"same", b"").unwrap();
    let b = encrypt(&pair.public_key, b"same", b"").unwrap();
    assert_ne!(a.capsule, b.capsule);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_kem_dem_empty_plaintext() {
    let pair = generate_keypair().unwrap();
    let sealed = encrypt(&pair.public_key, b"", b"").unwrap();
    assert_eq!(sealed.ciphertext.len(), AEAD_TAG_SIZE);
    assert!(decrypt(&pair.secret_key, &sealed, b"").unwrap().is_empty());
}

#[test]
fn test_kem_dem_tampering() {
    let pair = generate_keypair().unwrap();
    let sealed = encrypt(&pair.public_key, b"payload", b"ctx").unwrap();

    assert_rejected(decrypt(&pair.secret_key, &sealed, b"ctx2"));

    let mut bad = sealed.clone();
    bad.capsule[0] ^= 0x01;
    assert_rejected(decrypt(&pair.secret_key, &bad, b"ctx"));

    let mut bad = sealed.clone();
    bad.ciphertext[0] ^= 0x01;
    assert_rejected(decrypt(&pair.secret_key, &bad, b"ctx"));

    let mut bad = sealed.clone();
    bad.nonce.pop();
    assert_rejected(decrypt(&pair.secret_key, &bad, b"ctx"));

    let mut bad = sealed.clone();
    bad.ciphertext.truncate(AEAD_TAG_SIZE - 1);
    assert_rejected(decrypt(&pair.secret_key, &bad, b"ctx"));

    let mut bad = sealed.clone();
    bad.capsule.truncate(10);
    assert_rejected(decrypt(&pair.secret_key, &bad, b"ctx"));
}

#[test]
fn test_kem_dem_wrong_secret_key() {
    let alice = generate_keypair().unwrap();
    let mallory = generate_keypair().unwrap();
    let sealed = encrypt(&alice.public_key, b"for alice", b"").unwrap();
    assert_rejected(decrypt(&mallory.secret_key, &sealed, b""));
}

#[test]
fn test_kem_dem_bad_key_lengths() {
    let pair = generate_keypair().unwrap();
    assert!(matches!(
        encrypt(&pair.public_key[..100], b"x", b""),
        Err(CryptoError::InvalidRequest { .. })
    ));

    let sealed = encrypt(&pair.public_key, b"x", b"").unwrap();
    assert!(matches!(
        decrypt(&pair.secret_key[..100], &sealed, b""),
        Err(CryptoError::InvalidRequest { .. })
    ));
}

#[test]
fn test_kem_dem_ciphertext_json() {
    let pair = generate_keypair().unwrap();
    let sealed = encrypt(&pair.public_key, b"serialized", b"ad").unwrap();
    let json = serde_json::to_string(&sealed).unwrap();
    let parsed: KemDemCiphertext = serde_json::from_str(&json).unwrap();
    assert_eq!(decrypt(&pair.secret_key, &parsed, b"ad").unwrap(), b"serialized");
}

#[test]
fn test_keypair_debug_redacts_secret() {
    let pair = generate_keypair().unwrap();
    let debug = format!("{:?}", pair);
    assert!(debug.contains("<redacted>"));
    assert!(!debug.contains(&hex::encode(&pair.secret_key[..16])));
}
