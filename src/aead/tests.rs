use super::*;
use crate::error::{error_codes, CryptoError};
use crate::policy::KeyType;

fn all_ciphers() -> Vec<AeadCipher> {
    vec![
        AeadCipher::new(KeyType::Aes128Gcm96, &[0x11; 16]).unwrap(),
        AeadCipher::new(KeyType::Aes256Gcm96, &[0x22; 32]).unwrap(),
        AeadCipher::new(KeyType::ChaCha20Poly1305, &[0x33; 32]).unwrap(),
    ]
}

#[test]
fn test_seal_open_roundtrip() {
    for cipher in all_ciphers() {
        let nonce = cipher.generate_nonce();
        assert_eq!(nonce.len(), AEAD_NONCE_SIZE);

        let sealed = cipher.seal(&nonce, b"attack at dawn", b"ad").unwrap();
        assert_eq!(sealed.len(), 14 + cipher.overhead());

        let opened = cipher.open(&nonce, &sealed, b"ad").unwrap();
        assert_eq!(opened, b"attack at dawn");
    }
}

#[test]
fn test_tampering_is_authentication_failure() {
    for cipher in all_ciphers() {
        let nonce = cipher.generate_nonce();
        let mut sealed = cipher.seal(&nonce, b"payload", b"").unwrap();
        sealed[0] ^= 0x01;

        let err = cipher.open(&nonce, &sealed, b"").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailure { .. }));
    }
}

#[test]
fn test_associated_data_mismatch() {
    let cipher = AeadCipher::new(KeyType::Aes256Gcm96, &[7u8; 32]).unwrap();
    let nonce = cipher.generate_nonce();
    let sealed = cipher.seal(&nonce, b"payload", b"one").unwrap();

    assert!(cipher.open(&nonce, &sealed, b"two").is_err());
    assert!(cipher.open(&nonce, &sealed, b"one").is_ok());
}

#[test]
fn test_wrong_nonce_size() {
    let cipher = AeadCipher::new(KeyType::ChaCha20Poly1305, &[1u8; 32]).unwrap();
    let err = cipher.seal(&[0u8; 8], b"x", b"").unwrap_err();
    assert_eq!(err.error_code(), error_codes::NONCE_INVALID);
}

#[test]
fn test_key_validation() {
    assert!(AeadCipher::new(KeyType::Aes128Gcm96, &[0u8; 32]).is_err());
    assert!(AeadCipher::new(KeyType::Aes256Gcm96, &[0u8; 16]).is_err());
    assert!(AeadCipher::new(KeyType::Hmac, &[0u8; 32]).is_err());
}

#[test]
fn test_distinct_ciphers_do_not_interoperate() {
    let gcm = AeadCipher::new(KeyType::Aes256Gcm96, &[9u8; 32]).unwrap();
    let chacha = AeadCipher::new(KeyType::ChaCha20Poly1305, &[9u8; 32]).unwrap();
    let nonce = [0u8; AEAD_NONCE_SIZE];

    let sealed = gcm.seal(&nonce, b"data", b"").unwrap();
    assert!(chacha.open(&nonce, &sealed, b"").is_err());
}
