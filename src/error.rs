/*!
 * Error Handling for the Transit Key Engine
 *
 * Provides the error type shared by the KBKDF library, the policy engine and
 * the lock manager, together with stable numeric error codes and
 * user-facing messages.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Message returned when a ciphertext or signature was produced with a key
/// version below the policy's minimum decryption version.
pub const ERR_TOO_OLD: &str = "ciphertext or signature version is disallowed by policy (too old)";

/// Error type for all key engine operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The caller supplied something the engine cannot act on.
    #[error("invalid request: {operation} - {cause}")]
    InvalidRequest {
        operation: String,
        cause: String,
        error_code: u32,
    },

    /// An engine invariant does not hold.
    #[error("internal error: {operation} - {cause}")]
    Internal {
        operation: String,
        cause: String,
        error_code: u32,
    },

    /// Propagated from the storage collaborator.
    #[error("storage error: {operation} - {cause}")]
    Storage {
        operation: String,
        cause: String,
        error_code: u32,
    },

    /// AEAD tag or RSA padding check failed. Deliberately opaque.
    #[error("decryption failed")]
    AuthenticationFailure { operation: String, error_code: u32 },

    #[error("{}", ERR_TOO_OLD)]
    TooOld { version: i64 },

    /// The policy's configuration forbids the operation.
    #[error("operation not allowed: {operation} - {cause}")]
    NotAllowed {
        operation: String,
        cause: String,
        error_code: u32,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("OQS library error: {0}")]
    OqsError(String),
}

/// Error code constants for different error categories
pub mod error_codes {
    // KBKDF errors: 1000-1999
    pub const KBKDF_INVALID_PARAMETERS: u32 = 1001;
    pub const KBKDF_INVALID_KEY_LENGTH: u32 = 1002;
    pub const KBKDF_KEYS_EXHAUSTED: u32 = 1003;
    pub const KBKDF_WRONG_BUFFER_SIZE: u32 = 1004;
    pub const KBKDF_TOO_MANY_ITERATIONS: u32 = 1005;
    pub const KBKDF_PRF_FAILED: u32 = 1006;

    // Policy errors: 2000-2999
    pub const POLICY_INVARIANT_VIOLATED: u32 = 2001;
    pub const POLICY_VERSION_INVALID: u32 = 2002;
    pub const POLICY_DELETED: u32 = 2003;
    pub const POLICY_UPGRADE_FAILED: u32 = 2004;
    pub const POLICY_ROTATION_DENIED: u32 = 2005;
    pub const POLICY_BACKUP_DENIED: u32 = 2006;
    pub const POLICY_TEMPLATE_INVALID: u32 = 2007;
    pub const POLICY_KEY_GENERATION_FAILED: u32 = 2008;

    // Key operation errors: 3000-3999
    pub const OPERATION_UNSUPPORTED: u32 = 3001;
    pub const ENVELOPE_MALFORMED: u32 = 3002;
    pub const DERIVATION_FAILED: u32 = 3003;
    pub const NONCE_INVALID: u32 = 3004;
    pub const ENCRYPTION_FAILED: u32 = 3005;
    pub const DECRYPTION_FAILED: u32 = 3006;
    pub const SIGNING_FAILED: u32 = 3007;
    pub const SIGNATURE_MALFORMED: u32 = 3008;
    pub const SALT_LENGTH_INVALID: u32 = 3009;
    pub const WRAP_FAILED: u32 = 3010;
    pub const CERTIFICATE_INVALID: u32 = 3011;
    pub const MISSING_KEY_MATERIAL: u32 = 3012;

    // Lock manager errors: 4000-4999
    pub const POLICY_NOT_FOUND: u32 = 4001;
    pub const POLICY_EXISTS: u32 = 4002;
    pub const DELETION_DENIED: u32 = 4003;
    pub const CACHE_CONFIG_INVALID: u32 = 4004;
    pub const STORAGE_FAILED: u32 = 4005;

    // Import and parse errors: 5000-5999
    pub const IMPORT_KEY_SIZE_INVALID: u32 = 5001;
    pub const IMPORT_KEY_TYPE_MISMATCH: u32 = 5002;
    pub const IMPORT_PARSE_FAILED: u32 = 5003;
    pub const IMPORT_KEY_PAIR_MISMATCH: u32 = 5004;

    // KEM-DEM errors: 6000-6999
    pub const KEM_ENCAPSULATION_FAILED: u32 = 6001;
    pub const KEM_DECAPSULATION_FAILED: u32 = 6002;
    pub const KEM_CAPSULE_INVALID: u32 = 6003;
}

impl CryptoError {
    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            CryptoError::InvalidRequest { error_code, .. } => *error_code,
            CryptoError::Internal { error_code, .. } => *error_code,
            CryptoError::Storage { error_code, .. } => *error_code,
            CryptoError::AuthenticationFailure { error_code, .. } => *error_code,
            CryptoError::NotAllowed { error_code, .. } => *error_code,
            CryptoError::TooOld { .. } => error_codes::POLICY_VERSION_INVALID,
            CryptoError::SerializationError(_) => 9001,
            CryptoError::OqsError(_) => 9003,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            CryptoError::InvalidRequest { operation, cause, .. } => {
                format!("The request to '{}' was rejected: {}.", operation, cause)
            }
            CryptoError::Internal { operation, .. } => {
                format!(
                    "Operation '{}' hit an internal error. The key state was left unchanged.",
                    operation
                )
            }
            CryptoError::Storage { operation, .. } => {
                format!(
                    "Storage was unavailable during '{}'. In-memory changes were rolled back.",
                    operation
                )
            }
            CryptoError::AuthenticationFailure { .. } => {
                "Decryption failed. The ciphertext, key version, or associated data does not match."
                    .to_string()
            }
            CryptoError::TooOld { version } => format!(
                "Key version {} is below the minimum version allowed by the key's policy.",
                version
            ),
            CryptoError::NotAllowed { operation, cause, .. } => {
                format!("Operation '{}' is not allowed for this key: {}.", operation, cause)
            }
            CryptoError::SerializationError(_) => {
                "Data serialization failed. Data format may be corrupted.".to_string()
            }
            CryptoError::OqsError(_) => {
                "OQS library error. Check library version and configuration.".to_string()
            }
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();

        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("error_type".to_string(), self.error_type().to_string());

        match self {
            CryptoError::InvalidRequest { operation, cause, .. }
            | CryptoError::Internal { operation, cause, .. }
            | CryptoError::Storage { operation, cause, .. }
            | CryptoError::NotAllowed { operation, cause, .. } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            CryptoError::AuthenticationFailure { operation, .. } => {
                details.insert("operation".to_string(), operation.clone());
            }
            CryptoError::TooOld { version } => {
                details.insert("version".to_string(), version.to_string());
            }
            _ => {
                details.insert("details".to_string(), format!("{:?}", self));
            }
        }

        details
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            CryptoError::InvalidRequest { .. } => "InvalidRequest",
            CryptoError::Internal { .. } => "Internal",
            CryptoError::Storage { .. } => "Storage",
            CryptoError::AuthenticationFailure { .. } => "AuthenticationFailure",
            CryptoError::TooOld { .. } => "TooOld",
            CryptoError::NotAllowed { .. } => "NotAllowed",
            CryptoError::SerializationError(_) => "SerializationError",
            CryptoError::OqsError(_) => "OqsError",
        }
    }

    /// Whether the error was caused by the request rather than the engine
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidRequest { .. }
                | CryptoError::TooOld { .. }
                | CryptoError::NotAllowed { .. }
                | CryptoError::AuthenticationFailure { .. }
        )
    }
}

/// Convenience constructors for common error types
impl CryptoError {
    pub fn invalid_request(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::InvalidRequest {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn internal(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::Internal {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn storage(operation: &str, cause: &str) -> Self {
        CryptoError::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code: error_codes::STORAGE_FAILED,
        }
    }

    pub fn not_allowed(operation: &str, cause: &str, error_code: u32) -> Self {
        CryptoError::NotAllowed {
            operation: operation.to_string(),
            cause: cause.to_string(),
            error_code,
        }
    }

    pub fn authentication_failure(operation: &str) -> Self {
        CryptoError::AuthenticationFailure {
            operation: operation.to_string(),
            error_code: error_codes::DECRYPTION_FAILED,
        }
    }

    pub fn too_old(version: i64) -> Self {
        CryptoError::TooOld { version }
    }
}

// From implementations for automatic error conversion
impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::SerializationError(format!("invalid base64: {}", err))
    }
}

impl From<oqs::Error> for CryptoError {
    fn from(err: oqs::Error) -> Self {
        CryptoError::OqsError(err.to_string())
    }
}

/// Result type alias for key engine operations
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_generation() {
        let error = CryptoError::invalid_request(
            "encrypt",
            "requested version for encryption is negative",
            error_codes::POLICY_VERSION_INVALID,
        );
        assert_eq!(error.error_code(), error_codes::POLICY_VERSION_INVALID);
        assert_eq!(error.error_type(), "InvalidRequest");
    }

    #[test]
    fn test_too_old_message_is_fixed() {
        let error = CryptoError::too_old(3);
        assert_eq!(error.to_string(), ERR_TOO_OLD);
        assert!(error.is_user_error());
    }

    #[test]
    fn test_authentication_failure_is_opaque() {
        let error = CryptoError::authentication_failure("decrypt");
        assert_eq!(error.to_string(), "decryption failed");
        assert!(error.user_friendly_message().contains("Decryption failed"));
    }

    #[test]
    fn test_technical_details() {
        let error = CryptoError::internal(
            "persist",
            "archive version not up-to-date",
            error_codes::POLICY_INVARIANT_VIOLATED,
        );
        let details = error.technical_details();
        assert!(details.contains_key("error_code"));
        assert!(details.contains_key("operation"));
        assert!(details.contains_key("cause"));
        assert!(!error.is_user_error());
    }
}
