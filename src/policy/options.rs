use crate::aead::AeadProvider;
use crate::policy::key_type::{HashType, MarshalingType, PaddingScheme, SaltLength, SignatureAlgorithm};
use crate::policy::managed::ManagedKeySystem;

/// Per-call inputs for [`Policy::encrypt`](crate::policy::Policy::encrypt)
/// and [`Policy::decrypt`](crate::policy::Policy::decrypt).
///
/// Every field is optional; `Default` gives a plain non-derived call.
#[derive(Clone, Copy, Default)]
pub struct EncryptOptions<'a> {
    /// Derivation context, required when the policy is derived
    pub context: &'a [u8],
    /// Caller nonce for convergent v1 or explicit-nonce encryption
    pub nonce: &'a [u8],
    /// Bound into the AEAD tag; ignored by key types without associated data
    pub associated_data: &'a [u8],
    /// RSA padding; `None` selects OAEP
    pub padding_scheme: Option<PaddingScheme>,
    /// External AEAD used by managed keys
    pub aead_provider: Option<&'a dyn AeadProvider>,
    pub managed_keys: Option<&'a dyn ManagedKeySystem>,
}

/// Decrypt takes the same inputs as encrypt.
pub type DecryptOptions<'a> = EncryptOptions<'a>;

impl<'a> EncryptOptions<'a> {
    pub fn with_context(mut self, context: &'a [u8]) -> Self {
        self.context = context;
        self
    }

    pub fn with_nonce(mut self, nonce: &'a [u8]) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn with_associated_data(mut self, associated_data: &'a [u8]) -> Self {
        self.associated_data = associated_data;
        self
    }

    pub fn with_padding_scheme(mut self, padding_scheme: PaddingScheme) -> Self {
        self.padding_scheme = Some(padding_scheme);
        self
    }

    pub fn with_aead_provider(mut self, provider: &'a dyn AeadProvider) -> Self {
        self.aead_provider = Some(provider);
        self
    }

    pub fn with_managed_keys(mut self, system: &'a dyn ManagedKeySystem) -> Self {
        self.managed_keys = Some(system);
        self
    }

    pub(crate) fn padding(&self) -> PaddingScheme {
        self.padding_scheme.unwrap_or_default()
    }
}

/// Per-call inputs for signing and verification
#[derive(Clone, Copy, Default)]
pub struct SigningOptions<'a> {
    /// Derivation context for derived Ed25519 keys
    pub context: &'a [u8],
    /// Hash the caller applied to the input (RSA, managed) or that Ed25519
    /// must refuse
    pub hash: HashType,
    pub marshaling: MarshalingType,
    pub signature_algorithm: SignatureAlgorithm,
    pub salt_length: SaltLength,
    /// Ed25519ctx context string; not supported and rejected when set
    pub ed25519_context: &'a str,
    pub managed_keys: Option<&'a dyn ManagedKeySystem>,
}

impl<'a> SigningOptions<'a> {
    pub fn with_context(mut self, context: &'a [u8]) -> Self {
        self.context = context;
        self
    }

    pub fn with_hash(mut self, hash: HashType) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_marshaling(mut self, marshaling: MarshalingType) -> Self {
        self.marshaling = marshaling;
        self
    }

    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    pub fn with_salt_length(mut self, salt_length: SaltLength) -> Self {
        self.salt_length = salt_length;
        self
    }

    pub fn with_managed_keys(mut self, system: &'a dyn ManagedKeySystem) -> Self {
        self.managed_keys = Some(system);
        self
    }
}

/// Output of a signing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningResult {
    /// Version-prefixed, base64-encoded signature
    pub signature: String,
    /// Raw Ed25519 public key of a derived signing key; empty otherwise
    pub public_key: Vec<u8>,
}
