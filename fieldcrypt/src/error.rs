//! Error types for `fieldcrypt` operations.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for `fieldcrypt` operations.
///
/// Messages never carry plaintext or key material.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key resolution failed
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Value does not start with the expected envelope prefix
    #[error("invalid encrypted format: value does not carry an envelope prefix")]
    InvalidFormat,

    /// Envelope payload is not valid base64 (or decrypted text is not UTF-8)
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Envelope is shorter than the minimum or its length fields are inconsistent
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Authentication tag verification failed (tampering, wrong key or wrong AAD)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// The cipher refused to encrypt the input
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Caller supplied an argument outside its accepted range or set
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A non-nullable mapped field held no value
    #[error("field `{0}` is not nullable but has no value")]
    MissingValue(String),

    /// Structured field (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid or incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors specific to key material and key lookup.
#[derive(Debug)]
pub enum KeyError {
    /// Key material could not be decoded or has the wrong length
    InvalidKey {
        /// Required key length in bytes
        expected: usize,
        /// What was wrong with the material (never the material itself)
        reason: &'static str,
    },

    /// An envelope names a key id that is neither current nor rotated
    NotFound(String),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { expected, reason } => {
                write!(f, "key must be exactly {expected} bytes for AES-256 ({reason})")
            }
            Self::NotFound(id) => write!(f, "key id '{id}' not found"),
        }
    }
}

impl std::error::Error for KeyError {}

impl Error {
    /// Returns `true` for failures caused by the shape of the stored value
    /// rather than by keys or authentication.
    #[must_use]
    pub const fn is_format_error(&self) -> bool {
        matches!(self, Self::InvalidFormat | Self::InvalidEncoding(_) | Self::MalformedEnvelope(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_key_message_cites_length() {
        let err = Error::from(KeyError::InvalidKey { expected: 32, reason: "invalid hex" });
        let msg = err.to_string();
        assert!(msg.contains("32 bytes"));
        assert!(msg.contains("invalid hex"));
    }

    #[test]
    fn test_not_found_message_names_id() {
        let err = KeyError::NotFound("v7".to_string());
        assert_eq!(err.to_string(), "key id 'v7' not found");
    }

    #[test]
    fn test_format_errors_are_distinct_from_authentication() {
        assert!(Error::InvalidFormat.is_format_error());
        assert!(Error::MalformedEnvelope("short".into()).is_format_error());
        assert!(!Error::AuthenticationFailed.is_format_error());
    }
}
