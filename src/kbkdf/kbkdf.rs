use log::debug;
use zeroize::{Zeroize, Zeroizing};

use super::parameters::{encode_parameters, DkmLengthMethod, EncodeContext, KbkdfParameter};
use super::prf::Prf;
use crate::error::{error_codes, CryptoError, CryptoResult};

/// Upper bound on PRF invocations for a single derivation (2^32 - 1).
pub const MAX_ITERATIONS: u64 = u32::MAX as u64;

/// Which SP800-108 construction a [`KeyStream`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KbkdfMode {
    Counter,
    Feedback,
    DoublePipeline,
}

/// A lazy producer of derived keys.
///
/// A stream is configured with the sizes of every key it will produce. Each
/// call to [`KeyStream::next_key`] runs just enough PRF iterations to cover
/// the next key, continuing the counter and chaining state from the
/// previous key. Once every configured key has been produced the chaining
/// value is wiped and further requests fail.
///
/// # Examples
///
/// ```
/// use transit_keys::kbkdf::{counter_mode, HmacPrf, KbkdfParameter, DkmLengthMethod};
///
/// let prf = HmacPrf::sha256(b"0123456789abcdef0123456789abcdef");
/// let params = vec![
///     KbkdfParameter::counter(32),
///     KbkdfParameter::ByteArray(b"label".to_vec()),
///     KbkdfParameter::dkm_length(DkmLengthMethod::SumOfKeys, 32),
/// ];
/// let mut stream = counter_mode(prf, params, &[256, 128]).unwrap();
///
/// let enc_key = stream.next_key_vec().unwrap();
/// let mac_key = stream.next_key_vec().unwrap();
/// assert_eq!(enc_key.len(), 32);
/// assert_eq!(mac_key.len(), 16);
/// assert!(stream.next_key_vec().is_err());
/// ```
pub struct KeyStream<P: Prf> {
    prf: P,
    mode: KbkdfMode,
    parameters: Vec<KbkdfParameter>,
    key_bits: Vec<usize>,
    next_key: usize,
    counter: u64,
    chain: Zeroizing<Vec<u8>>,
}

impl<P: Prf> std::fmt::Debug for KeyStream<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStream")
            .field("mode", &self.mode)
            .field("key_bits", &self.key_bits)
            .field("next_key", &self.next_key)
            .field("counter", &self.counter)
            .finish()
    }
}

fn invalid(cause: &str, error_code: u32) -> CryptoError {
    CryptoError::invalid_request("kbkdf", cause, error_code)
}

/// Total PRF invocations needed for all keys, as a `SumOfSegments` length
/// divided by the PRF size.
fn total_iterations(key_bits: &[usize], prf_bits: usize) -> u64 {
    if prf_bits == 0 {
        return 0;
    }
    DkmLengthMethod::SumOfSegments.length(key_bits, prf_bits) / prf_bits as u64
}

fn validate_common<P: Prf>(
    prf: &P,
    parameters: &[KbkdfParameter],
    key_bits: &[usize],
) -> CryptoResult<()> {
    if prf.output_size() == 0 {
        return Err(invalid("PRF output size is zero", error_codes::KBKDF_INVALID_PARAMETERS));
    }
    if key_bits.is_empty() {
        return Err(invalid("no key lengths requested", error_codes::KBKDF_INVALID_KEY_LENGTH));
    }
    for &bits in key_bits {
        if bits == 0 || bits % 8 != 0 {
            return Err(invalid(
                &format!("key length {} bits is not a non-zero multiple of 8", bits),
                error_codes::KBKDF_INVALID_KEY_LENGTH,
            ));
        }
    }
    for parameter in parameters {
        parameter.validate()?;
    }

    let iterations = total_iterations(key_bits, prf.output_size() * 8);
    if iterations > MAX_ITERATIONS {
        return Err(invalid(
            &format!("{} PRF iterations exceeds the limit of {}", iterations, MAX_ITERATIONS),
            error_codes::KBKDF_TOO_MANY_ITERATIONS,
        ));
    }

    // Every counter field must be able to address the last iteration.
    let narrowest = parameters
        .iter()
        .filter_map(|p| match p {
            KbkdfParameter::CounterVariable { width_bits, .. } => Some(*width_bits),
            _ => None,
        })
        .min();
    if let Some(width) = narrowest {
        let addressable = (1u64 << width) - 1;
        if iterations > addressable {
            return Err(invalid(
                &format!(
                    "{} PRF iterations cannot be addressed by a {}-bit counter",
                    iterations, width
                ),
                error_codes::KBKDF_TOO_MANY_ITERATIONS,
            ));
        }
    }

    Ok(())
}

fn has_counter(parameters: &[KbkdfParameter]) -> bool {
    parameters
        .iter()
        .any(|p| matches!(p, KbkdfParameter::CounterVariable { .. }))
}

fn has_chain(parameters: &[KbkdfParameter]) -> bool {
    parameters
        .iter()
        .any(|p| matches!(p, KbkdfParameter::ChainingVariable))
}

/// KBKDF in Counter mode: `K(i) = PRF(K_I, [i]_r || fixed data)`.
///
/// Requires at least one counter field and rejects chaining fields. The
/// counter starts at 1 and keeps counting across keys.
pub fn counter_mode<P: Prf>(
    prf: P,
    parameters: Vec<KbkdfParameter>,
    key_bits: &[usize],
) -> CryptoResult<KeyStream<P>> {
    validate_common(&prf, &parameters, key_bits)?;
    if !has_counter(&parameters) {
        return Err(invalid(
            "counter mode requires a counter variable parameter",
            error_codes::KBKDF_INVALID_PARAMETERS,
        ));
    }
    if has_chain(&parameters) {
        return Err(invalid(
            "chaining variable is not permitted in counter mode",
            error_codes::KBKDF_INVALID_PARAMETERS,
        ));
    }
    Ok(KeyStream::new(prf, KbkdfMode::Counter, parameters, key_bits, Vec::new()))
}

/// KBKDF in Feedback mode: `K(i) = PRF(K_I, K(i-1) {|| [i]_r} || fixed data)`
/// with `K(0)` set to `iv` (empty when absent).
pub fn feedback_mode<P: Prf>(
    prf: P,
    parameters: Vec<KbkdfParameter>,
    iv: Option<&[u8]>,
    key_bits: &[usize],
) -> CryptoResult<KeyStream<P>> {
    validate_common(&prf, &parameters, key_bits)?;
    if !has_chain(&parameters) {
        return Err(invalid(
            "feedback mode requires a chaining variable parameter",
            error_codes::KBKDF_INVALID_PARAMETERS,
        ));
    }
    let chain = iv.map(<[u8]>::to_vec).unwrap_or_default();
    Ok(KeyStream::new(prf, KbkdfMode::Feedback, parameters, key_bits, chain))
}

/// KBKDF in Double-Pipeline mode.
///
/// Each iteration first computes `A(i) = PRF(K_I, fixed data with A(i-1))`
/// with counter fields omitted, starting from an empty `A(0)`, and then
/// `K(i) = PRF(K_I, fixed data with A(i) and [i]_r)`.
pub fn double_pipeline_mode<P: Prf>(
    prf: P,
    parameters: Vec<KbkdfParameter>,
    key_bits: &[usize],
) -> CryptoResult<KeyStream<P>> {
    validate_common(&prf, &parameters, key_bits)?;
    if !has_chain(&parameters) {
        return Err(invalid(
            "double-pipeline mode requires a chaining variable parameter",
            error_codes::KBKDF_INVALID_PARAMETERS,
        ));
    }
    Ok(KeyStream::new(
        prf,
        KbkdfMode::DoublePipeline,
        parameters,
        key_bits,
        Vec::new(),
    ))
}

/// Derive a single key with the default Counter-mode layout
/// `[i]_32 || context || [L]_32`, counter starting at 1.
pub fn counter_derive<P: Prf>(
    prf: P,
    context: &[u8],
    key_bits: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let parameters = vec![
        KbkdfParameter::counter(32),
        KbkdfParameter::ByteArray(context.to_vec()),
        KbkdfParameter::dkm_length(DkmLengthMethod::SumOfKeys, 32),
    ];
    counter_mode(prf, parameters, &[key_bits])?.next_key_vec()
}

impl<P: Prf> KeyStream<P> {
    fn new(
        prf: P,
        mode: KbkdfMode,
        parameters: Vec<KbkdfParameter>,
        key_bits: &[usize],
        chain: Vec<u8>,
    ) -> Self {
        debug!(
            "kbkdf {:?} stream configured for {} key(s)",
            mode,
            key_bits.len()
        );
        Self {
            prf,
            mode,
            parameters,
            key_bits: key_bits.to_vec(),
            next_key: 0,
            counter: 1,
            chain: Zeroizing::new(chain),
        }
    }

    pub fn mode(&self) -> KbkdfMode {
        self.mode
    }

    /// Keys still to be produced
    pub fn remaining(&self) -> usize {
        self.key_bits.len() - self.next_key
    }

    /// Size in bytes of the next key, if any remain
    pub fn next_key_len(&self) -> Option<usize> {
        self.key_bits.get(self.next_key).map(|bits| bits / 8)
    }

    /// Fill `out` with the next configured key.
    ///
    /// `out` must be exactly the configured length of that key.
    pub fn next_key(&mut self, out: &mut [u8]) -> CryptoResult<()> {
        let wanted = self.next_key_len().ok_or_else(|| {
            invalid(
                "all configured keys have already been produced",
                error_codes::KBKDF_KEYS_EXHAUSTED,
            )
        })?;
        if out.len() != wanted {
            return Err(invalid(
                &format!("buffer of {} bytes supplied for a {} byte key", out.len(), wanted),
                error_codes::KBKDF_WRONG_BUFFER_SIZE,
            ));
        }

        let prf_len = self.prf.output_size();
        let iterations = wanted.div_ceil(prf_len);
        let mut written = 0;
        for _ in 0..iterations {
            let block = Zeroizing::new(self.iterate()?);
            if block.len() != prf_len {
                return Err(CryptoError::internal(
                    "kbkdf",
                    "PRF length mismatch",
                    error_codes::KBKDF_PRF_FAILED,
                ));
            }
            let take = prf_len.min(wanted - written);
            out[written..written + take].copy_from_slice(&block[..take]);
            written += take;
        }

        self.next_key += 1;
        if self.next_key == self.key_bits.len() {
            self.chain.zeroize();
        }
        Ok(())
    }

    /// Produce the next configured key into a fresh buffer
    pub fn next_key_vec(&mut self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let len = self.next_key_len().ok_or_else(|| {
            invalid(
                "all configured keys have already been produced",
                error_codes::KBKDF_KEYS_EXHAUSTED,
            )
        })?;
        let mut out = Zeroizing::new(vec![0u8; len]);
        self.next_key(&mut out)?;
        Ok(out)
    }

    fn context<'a>(&'a self, counter: Option<u64>, chain: &'a [u8]) -> EncodeContext<'a> {
        EncodeContext {
            counter,
            chain,
            key_bits: &self.key_bits,
            prf_bits: self.prf.output_size() * 8,
        }
    }

    /// Run one iteration of the construction and return its output block.
    fn iterate(&mut self) -> CryptoResult<Vec<u8>> {
        let counter = self.counter;
        let block = match self.mode {
            KbkdfMode::Counter => {
                let input = Zeroizing::new(encode_parameters(
                    &self.parameters,
                    &self.context(Some(counter), &[]),
                ));
                self.prf.compute(&input)?
            }
            KbkdfMode::Feedback => {
                let input = Zeroizing::new(encode_parameters(
                    &self.parameters,
                    &self.context(Some(counter), &self.chain),
                ));
                let block = self.prf.compute(&input)?;
                self.chain = Zeroizing::new(block.clone());
                block
            }
            KbkdfMode::DoublePipeline => {
                let pipeline_input = Zeroizing::new(encode_parameters(
                    &self.parameters,
                    &self.context(None, &self.chain),
                ));
                let pipeline = Zeroizing::new(self.prf.compute(&pipeline_input)?);
                let input = Zeroizing::new(encode_parameters(
                    &self.parameters,
                    &self.context(Some(counter), &pipeline),
                ));
                let block = self.prf.compute(&input)?;
                self.chain = pipeline;
                block
            }
        };
        self.counter += 1;
        Ok(block)
    }
}

impl<P: Prf> Iterator for KeyStream<P> {
    type Item = CryptoResult<Zeroizing<Vec<u8>>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }
        Some(self.next_key_vec())
    }
}

impl<P: Prf> Drop for KeyStream<P> {
    fn drop(&mut self) {
        self.chain.zeroize();
    }
}
