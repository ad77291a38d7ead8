use zeroize::Zeroizing;

use super::prf::Prf;
use crate::error::{error_codes, CryptoError, CryptoResult};

/// Output size in bits of HMAC-SHA256 when used with [`legacy_counter_mode`]
pub const HMAC_SHA256_PRF_LEN: u32 = 256;

/// Single-shot counter KDF used by derived policies with the
/// `hmac-sha256-counter` KDF.
///
/// Each block is `PRF([i]_32 || data || [bits]_32)` with `i` starting at
/// **0**. This predates the SP800-108 engine in this module and its output
/// differs from [`super::counter_derive`] for the same inputs; existing
/// derived keys depend on it, so it is kept as is.
pub fn legacy_counter_mode<P: Prf>(
    prf: &P,
    data: &[u8],
    bits: u32,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let prf_len = (prf.output_size() * 8) as u32;
    if prf_len == 0 || prf_len % 8 != 0 {
        return Err(CryptoError::invalid_request(
            "legacy counter kdf",
            "PRF must be byte aligned",
            error_codes::KBKDF_INVALID_PARAMETERS,
        ));
    }
    if bits % 8 != 0 {
        return Err(CryptoError::invalid_request(
            "legacy counter kdf",
            "bits required must be byte aligned",
            error_codes::KBKDF_INVALID_KEY_LENGTH,
        ));
    }

    let rounds = bits.div_ceil(prf_len);

    let mut input = Zeroizing::new(vec![0u8; 4 + data.len() + 4]);
    input[4..4 + data.len()].copy_from_slice(data);
    input[4 + data.len()..].copy_from_slice(&bits.to_be_bytes());

    let mut out = Zeroizing::new(Vec::with_capacity((rounds * prf_len / 8) as usize));
    for i in 0..rounds {
        input[..4].copy_from_slice(&i.to_be_bytes());
        let part = Zeroizing::new(prf.compute(&input)?);
        if (part.len() * 8) as u32 != prf_len {
            return Err(CryptoError::internal(
                "legacy counter kdf",
                "PRF length mismatch",
                error_codes::KBKDF_PRF_FAILED,
            ));
        }
        out.extend_from_slice(&part);
    }

    out.truncate((bits / 8) as usize);
    Ok(out)
}
