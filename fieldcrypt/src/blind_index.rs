//! Blind index generation for searchable encryption.
//!
//! Blind indexes allow equality queries on encrypted data without revealing
//! the plaintext value. The index is computed as:
//!
//! ```text
//! HMAC-SHA{256,384,512}(blind_index_key, context || 0x00 || plaintext)
//! ```
//!
//! truncated to the requested number of bits. The context (for example
//! `"User.email"`) separates indexes of the same value used in different
//! places. Fewer bits mean more collisions, which trades lookup precision for
//! privacy.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};

use crate::error::Error;
use crate::key_provider::KeyProvider;

/// Smallest accepted index width in bits.
pub const MIN_BITS: u32 = 16;

/// Largest accepted index width in bits.
pub const MAX_BITS: u32 = 256;

/// Index width used when none is requested.
pub const DEFAULT_BITS: u32 = 64;

/// HMAC hash function for blind indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// HMAC-SHA256
    #[default]
    Sha256,
    /// HMAC-SHA384
    Sha384,
    /// HMAC-SHA512
    Sha512,
}

impl HashAlgorithm {
    /// Returns the configuration name of the algorithm.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::InvalidArgument(format!(
                "unknown blind index algorithm '{other}' (expected sha256, sha384 or sha512)"
            ))),
        }
    }
}

/// Checks that `bits` lies in `[MIN_BITS, MAX_BITS]`.
///
/// # Errors
///
/// Returns `Error::InvalidArgument` citing the valid range otherwise.
pub fn validate_bits(bits: u32) -> Result<u32, Error> {
    if (MIN_BITS..=MAX_BITS).contains(&bits) {
        Ok(bits)
    } else {
        Err(Error::InvalidArgument(format!(
            "blind index bits must be within [{MIN_BITS}, {MAX_BITS}], got {bits}"
        )))
    }
}

const TRIMMED_CHARS: &[char] = &[' ', '\t', '\n', '\r', '\0', '\x0B'];

/// Normalizes a value before indexing.
///
/// Trims ASCII space, tab, newline, carriage return, NUL and vertical tab
/// from both ends (other Unicode whitespace is kept) and, when
/// `case_insensitive` is set,
/// lower-cases with locale-independent Unicode rules. The same policy must be
/// applied when writing an index and when querying it.
///
/// # Example
///
/// ```
/// use fieldcrypt::blind_index::normalize;
///
/// assert_eq!(normalize("  Alice@Example.COM \n", true), "alice@example.com");
/// assert_eq!(normalize(" Alice ", false), "Alice");
/// ```
#[must_use]
pub fn normalize(value: &str, case_insensitive: bool) -> String {
    let trimmed = value.trim_matches(TRIMMED_CHARS);
    if case_insensitive {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Computes blind indexes with the provider's blind-index key.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fieldcrypt::blind_index::BlindIndexer;
/// use fieldcrypt::key_provider::StaticKeyProvider;
///
/// # fn main() -> Result<(), fieldcrypt::Error> {
/// let provider = Arc::new(StaticKeyProvider::new("01234567890123456789012345678901"));
/// let indexer = BlindIndexer::new(provider);
///
/// let index = indexer.generate("a@b.com", "User.email", None)?;
/// assert_eq!(index.len(), 16);
/// assert_eq!(index, indexer.generate("a@b.com", "User.email", Some(64))?);
/// assert_ne!(index, indexer.generate("a@b.com", "Contact.email", None)?);
/// # Ok(())
/// # }
/// ```
pub struct BlindIndexer<P: KeyProvider> {
    provider: Arc<P>,
    algorithm: HashAlgorithm,
    default_bits: u32,
}

impl<P: KeyProvider> BlindIndexer<P> {
    /// Creates an indexer using HMAC-SHA256 and 64-bit indexes by default.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider, algorithm: HashAlgorithm::default(), default_bits: DEFAULT_BITS }
    }

    /// Creates an indexer with an explicit algorithm and default width.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `default_bits` is out of range.
    pub fn with_options(
        provider: Arc<P>,
        algorithm: HashAlgorithm,
        default_bits: u32,
    ) -> Result<Self, Error> {
        Ok(Self { provider, algorithm, default_bits: validate_bits(default_bits)? })
    }

    /// Returns the configured hash algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Returns the width used when `generate` is called without `bits`.
    #[must_use]
    pub const fn default_bits(&self) -> u32 {
        self.default_bits
    }

    /// Generates a hex-encoded blind index.
    ///
    /// The output has `ceil(bits / 8) * 2` hex digits. When `bits` is not a
    /// multiple of 8 the unused high bits of the last byte are zero.
    ///
    /// The plaintext is hashed as given; call [`normalize`] first when the
    /// index should ignore case or surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `bits` is outside `[16, 256]`, or a
    /// key error if the blind-index key cannot be resolved.
    pub fn generate(&self, plaintext: &str, context: &str, bits: Option<u32>) -> Result<String, Error> {
        let bits = validate_bits(bits.unwrap_or(self.default_bits))?;
        let key = self.provider.blind_index_key()?;

        let digest = match self.algorithm {
            HashAlgorithm::Sha256 => keyed_digest::<Hmac<Sha256>>(key.expose(), context, plaintext),
            HashAlgorithm::Sha384 => keyed_digest::<Hmac<Sha384>>(key.expose(), context, plaintext),
            HashAlgorithm::Sha512 => keyed_digest::<Hmac<Sha512>>(key.expose(), context, plaintext),
        }?;

        Ok(hex::encode(truncate(&digest, bits)))
    }
}

impl<P: KeyProvider> Clone for BlindIndexer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            algorithm: self.algorithm,
            default_bits: self.default_bits,
        }
    }
}

fn keyed_digest<M: Mac + KeyInit>(key: &[u8], context: &str, plaintext: &str) -> Result<Vec<u8>, Error> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|e| Error::InvalidArgument(format!("invalid blind index key: {e}")))?;
    mac.update(context.as_bytes());
    mac.update(&[0x00]);
    mac.update(plaintext.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Keeps the leading `ceil(bits / 8)` bytes and zeroes the unused high bits
/// of the last one.
fn truncate(digest: &[u8], bits: u32) -> Vec<u8> {
    let len = bits.div_ceil(8) as usize;
    let mut out = digest[..len].to_vec();
    let partial = bits % 8;
    if partial != 0 {
        if let Some(last) = out.last_mut() {
            *last &= (1u8 << partial) - 1;
        }
    }
    out
}
