use crate::error::{error_codes, CryptoError, CryptoResult};

/// How a [`KbkdfParameter::DkmLength`] field computes the total length of
/// derived key material it encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DkmLengthMethod {
    /// The exact sum of the requested key lengths in bits
    SumOfKeys,
    /// Each key rounded up to whole PRF output blocks, then summed
    SumOfSegments,
}

impl DkmLengthMethod {
    /// Total DKM length in bits for `key_bits` under a PRF producing
    /// `prf_bits` per invocation.
    pub fn length(&self, key_bits: &[usize], prf_bits: usize) -> u64 {
        match self {
            DkmLengthMethod::SumOfKeys => key_bits.iter().map(|&b| b as u64).sum(),
            DkmLengthMethod::SumOfSegments => key_bits
                .iter()
                .map(|&b| segments(b, prf_bits) * prf_bits as u64)
                .sum(),
        }
    }
}

/// Number of PRF invocations needed to cover `bits`
pub(crate) fn segments(bits: usize, prf_bits: usize) -> u64 {
    if prf_bits == 0 {
        return 0;
    }
    bits.div_ceil(prf_bits) as u64
}

/// One field of the fixed input data fed to the PRF.
///
/// A parameter list is encoded in order on every PRF invocation, with the
/// counter, chaining value and DKM length substituted from the running
/// state of the KBKDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbkdfParameter {
    /// The iteration counter `[i]_r`. Width is 8, 16, 24 or 32 bits.
    CounterVariable { little_endian: bool, width_bits: u8 },
    /// The previous PRF output (Feedback) or pipeline value (Double-Pipeline).
    ChainingVariable,
    /// Label, context, separators: copied verbatim.
    ByteArray(Vec<u8>),
    /// `[L]_2`, the total derived length in bits. Width is at most 64 bits.
    DkmLength {
        method: DkmLengthMethod,
        little_endian: bool,
        width_bits: u8,
    },
}

/// Running state substituted into parameters during encoding
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    /// `None` omits every counter field (first Double-Pipeline invocation).
    pub counter: Option<u64>,
    pub chain: &'a [u8],
    pub key_bits: &'a [usize],
    pub prf_bits: usize,
}

impl KbkdfParameter {
    /// Convenience for a big-endian counter
    pub fn counter(width_bits: u8) -> Self {
        KbkdfParameter::CounterVariable {
            little_endian: false,
            width_bits,
        }
    }

    /// Convenience for a big-endian DKM length
    pub fn dkm_length(method: DkmLengthMethod, width_bits: u8) -> Self {
        KbkdfParameter::DkmLength {
            method,
            little_endian: false,
            width_bits,
        }
    }

    pub fn validate(&self) -> CryptoResult<()> {
        match self {
            KbkdfParameter::CounterVariable { width_bits, .. } => {
                if *width_bits == 0 || width_bits % 8 != 0 || *width_bits > 32 {
                    return Err(invalid(&format!(
                        "counter width must be a non-zero multiple of 8 no larger than 32 bits, got {}",
                        width_bits
                    )));
                }
            }
            KbkdfParameter::DkmLength { width_bits, .. } => {
                if *width_bits == 0 || width_bits % 8 != 0 || *width_bits > 64 {
                    return Err(invalid(&format!(
                        "length width must be a non-zero multiple of 8 no larger than 64 bits, got {}",
                        width_bits
                    )));
                }
            }
            KbkdfParameter::ChainingVariable | KbkdfParameter::ByteArray(_) => {}
        }
        Ok(())
    }

    /// Encode this field against the running state.
    pub fn encode(&self, ctx: &EncodeContext<'_>) -> Vec<u8> {
        match self {
            KbkdfParameter::CounterVariable {
                little_endian,
                width_bits,
            } => match ctx.counter {
                Some(counter) => {
                    encode_integer(counter, (*width_bits / 8) as usize, *little_endian)
                }
                None => Vec::new(),
            },
            KbkdfParameter::ChainingVariable => ctx.chain.to_vec(),
            KbkdfParameter::ByteArray(bytes) => bytes.clone(),
            KbkdfParameter::DkmLength {
                method,
                little_endian,
                width_bits,
            } => encode_integer(
                method.length(ctx.key_bits, ctx.prf_bits),
                (*width_bits / 8) as usize,
                *little_endian,
            ),
        }
    }
}

fn invalid(cause: &str) -> CryptoError {
    CryptoError::invalid_request("kbkdf parameters", cause, error_codes::KBKDF_INVALID_PARAMETERS)
}

/// Encode `value` into `bytes` bytes.
///
/// The value is always laid out as 8 bytes first; little-endian keeps the
/// low-order `bytes`, big-endian keeps the trailing (right-aligned) `bytes`.
/// `bytes` larger than 8 is clamped to 8.
pub fn encode_integer(value: u64, bytes: usize, little_endian: bool) -> Vec<u8> {
    let bytes = bytes.min(8);
    if little_endian {
        value.to_le_bytes()[..bytes].to_vec()
    } else {
        value.to_be_bytes()[8 - bytes..].to_vec()
    }
}

/// Concatenate the encodings of every parameter in order.
pub fn encode_parameters(parameters: &[KbkdfParameter], ctx: &EncodeContext<'_>) -> Vec<u8> {
    parameters.iter().flat_map(|p| p.encode(ctx)).collect()
}
