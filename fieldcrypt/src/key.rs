//! Key material resolution and derivation.
//!
//! Keys arrive from configuration as strings in one of three encodings:
//!
//! - `base64:<standard base64>`
//! - `hex:<hex digits>`
//! - anything else is taken as the literal UTF-8 bytes
//!
//! Every encoding must decode to exactly [`KEY_LEN`] bytes.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, KeyError};

/// AES-256 key size in bytes.
pub const KEY_LEN: usize = 32;

const BASE64_TAG: &str = "base64:";
const HEX_TAG: &str = "hex:";

/// A validated 32-byte key. Zeroized on drop, redacted in `Debug`.
pub struct KeyBytes(Secret<[u8; KEY_LEN]>);

impl KeyBytes {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        Self(Secret::new(bytes))
    }

    /// Exposes the raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.0.expose_secret()
    }
}

impl fmt::Debug for KeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyBytes([REDACTED])")
    }
}

/// Parses an encoded key string into validated key bytes.
///
/// # Errors
///
/// Returns `KeyError::InvalidKey` if the tagged payload does not decode or the
/// result is not exactly [`KEY_LEN`] bytes long.
///
/// # Example
///
/// ```
/// use fieldcrypt::key::resolve;
///
/// let key = resolve("01234567890123456789012345678901").expect("valid raw key");
/// assert_eq!(key.expose()[0], b'0');
/// assert!(resolve("hex:00ff").is_err());
/// ```
pub fn resolve(encoded: &str) -> Result<KeyBytes, KeyError> {
    let decoded = if let Some(payload) = encoded.strip_prefix(BASE64_TAG) {
        Zeroizing::new(STANDARD.decode(payload).map_err(|_| invalid("invalid base64"))?)
    } else if let Some(payload) = encoded.strip_prefix(HEX_TAG) {
        Zeroizing::new(hex::decode(payload).map_err(|_| invalid("invalid hex"))?)
    } else {
        Zeroizing::new(encoded.as_bytes().to_vec())
    };

    let mut bytes: [u8; KEY_LEN] =
        decoded.as_slice().try_into().map_err(|_| invalid("wrong length"))?;
    let key = KeyBytes::from_array(bytes);
    bytes.zeroize();

    Ok(key)
}

const fn invalid(reason: &'static str) -> KeyError {
    KeyError::InvalidKey { expected: KEY_LEN, reason }
}

/// Derives a sub-key as `SHA-256(key || label)`.
///
/// Used for the blind-index key (`:blind-index`) and the deterministic
/// nonce-derivation key (`:iv-derivation`). The output depends only on the
/// inputs, so it is stable across restarts.
#[must_use]
pub fn derive_subkey(key: &KeyBytes, label: &[u8]) -> KeyBytes {
    let digest = Sha256::new().chain_update(key.expose()).chain_update(label).finalize();

    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&digest);
    let derived = KeyBytes::from_array(bytes);
    bytes.zeroize();

    derived
}

/// Generates a fresh random key from the operating system CSPRNG.
///
/// # Example
///
/// ```
/// use fieldcrypt::key::generate;
///
/// let a = generate();
/// let b = generate();
/// assert_ne!(a.expose(), b.expose());
/// ```
#[must_use]
pub fn generate() -> KeyBytes {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    let key = KeyBytes::from_array(bytes);
    bytes.zeroize();
    key
}

/// Tagged string encodings accepted by [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// `base64:` prefix, standard alphabet with padding.
    #[default]
    Base64,
    /// `hex:` prefix, lowercase digits.
    Hex,
}

impl KeyEncoding {
    /// Renders a key as a tagged string that [`resolve`] accepts.
    #[must_use]
    pub fn encode(self, key: &KeyBytes) -> String {
        match self {
            Self::Base64 => format!("{BASE64_TAG}{}", STANDARD.encode(key.expose())),
            Self::Hex => format!("{HEX_TAG}{}", hex::encode(key.expose())),
        }
    }
}

impl FromStr for KeyEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            other => Err(Error::InvalidArgument(format!(
                "unknown key encoding '{other}' (expected base64 or hex)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "01234567890123456789012345678901";

    #[test]
    fn test_resolve_raw() {
        let key = resolve(RAW).expect("raw key should resolve");
        assert_eq!(key.expose(), RAW.as_bytes());
    }

    #[test]
    fn test_resolve_base64() {
        let encoded = format!("base64:{}", STANDARD.encode([7u8; KEY_LEN]));
        let key = resolve(&encoded).expect("base64 key should resolve");
        assert_eq!(key.expose(), &[7u8; KEY_LEN]);
    }

    #[test]
    fn test_resolve_hex() {
        let encoded = format!("hex:{}", "ab".repeat(KEY_LEN));
        let key = resolve(&encoded).expect("hex key should resolve");
        assert_eq!(key.expose(), &[0xab; KEY_LEN]);
    }

    #[test]
    fn test_resolve_rejects_bad_encodings() {
        assert!(matches!(
            resolve("base64:***"),
            Err(KeyError::InvalidKey { expected: KEY_LEN, reason: "invalid base64" })
        ));
        assert!(matches!(
            resolve("hex:zz"),
            Err(KeyError::InvalidKey { expected: KEY_LEN, reason: "invalid hex" })
        ));
    }

    #[test]
    fn test_resolve_rejects_wrong_length() {
        for encoded in ["short", "hex:0011", "base64:AAAA", ""] {
            let err = resolve(encoded).expect_err("must reject");
            assert!(matches!(err, KeyError::InvalidKey { reason: "wrong length", .. }));
        }
        let too_long = "x".repeat(KEY_LEN + 1);
        assert!(resolve(&too_long).is_err());
    }

    #[test]
    fn test_derive_subkey_is_stable_and_label_bound() {
        let key = resolve(RAW).unwrap();
        let a = derive_subkey(&key, b":blind-index");
        let b = derive_subkey(&key, b":blind-index");
        let c = derive_subkey(&key, b":iv-derivation");

        assert_eq!(a.expose(), b.expose());
        assert_ne!(a.expose(), c.expose());
        assert_ne!(a.expose(), key.expose());
    }

    #[test]
    fn test_derive_subkey_matches_sha256_of_concatenation() {
        let key = resolve(RAW).unwrap();
        let derived = derive_subkey(&key, b":blind-index");

        let mut input = RAW.as_bytes().to_vec();
        input.extend_from_slice(b":blind-index");
        let expected = Sha256::digest(&input);

        assert_eq!(derived.expose().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_generated_keys_round_trip_through_encodings() {
        let key = generate();
        for encoding in [KeyEncoding::Base64, KeyEncoding::Hex] {
            let encoded = encoding.encode(&key);
            let back = resolve(&encoded).expect("generated key should resolve");
            assert_eq!(back.expose(), key.expose());
        }
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = resolve(RAW).unwrap();
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("0123"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_key_encoding_from_str() {
        assert_eq!("hex".parse::<KeyEncoding>().unwrap(), KeyEncoding::Hex);
        assert!(matches!("pem".parse::<KeyEncoding>(), Err(Error::InvalidArgument(_))));
    }
}
