/*!
 * NIST SP800-108 key-based key derivation
 *
 * This module implements the Counter, Feedback and Double-Pipeline KBKDF
 * constructions as streaming key producers over a caller-described
 * parameter layout, plus the single-shot helpers the policy engine uses for
 * derived keys.
 */

mod kbkdf;
mod legacy;
mod parameters;
mod prf;

pub use kbkdf::*;
pub use legacy::*;
pub use parameters::*;
pub use prf::*;
