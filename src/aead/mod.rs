/*!
 * Authenticated encryption for symmetric policies
 *
 * This module wraps AES-128-GCM, AES-256-GCM and ChaCha20-Poly1305 behind a
 * single cipher type selected by key type, and defines the provider trait
 * callers implement to plug in an externally managed AEAD.
 */

mod aead;

pub use aead::*;

#[cfg(test)]
mod tests;
