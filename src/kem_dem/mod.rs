/*!
 * Kyber768 + AES-256-GCM hybrid encryption
 *
 * A standalone KEM-DEM: the recipient's Kyber768 public key encapsulates a
 * fresh shared secret, HKDF-SHA256 turns it into an AES-256-GCM key, and
 * the plaintext is sealed under that key with the caller's associated data.
 */

mod kem_dem;

pub use kem_dem::*;

#[cfg(test)]
mod tests;
