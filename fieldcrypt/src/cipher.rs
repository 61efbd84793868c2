//! AES-256-GCM sealing shared by the randomized and deterministic encryptors.
//!
//! Both modes produce the same envelope shape; they differ only in how the
//! nonce is chosen.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use serde::{Deserialize, Serialize};

use crate::envelope::{armor, unarmor, Envelope, NONCE_LEN, TAG_LEN};
use crate::error::Error;
use crate::key::KeyBytes;
use crate::key_provider::KeyProvider;

/// Default prefix for randomized envelopes.
pub const DEFAULT_PREFIX: &str = "ENC$1$";

/// Default prefix for deterministic envelopes.
pub const DEFAULT_DETERMINISTIC_PREFIX: &str = "DET$1$";

/// Encrypts values into prefixed envelope strings and back.
pub trait Encryptor: Send + Sync {
    /// Encrypts `plaintext` under the current key.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key cannot be resolved or the envelope
    /// cannot be built.
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error>;

    /// Decrypts an envelope produced by [`Encryptor::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns a format error for values that are not well-formed envelopes of
    /// this encryptor, `KeyError::NotFound` for unknown key ids, and
    /// `Error::AuthenticationFailed` when the tag does not verify.
    fn decrypt(&self, value: &str) -> Result<Vec<u8>, Error>;

    /// Returns `true` if `value` carries this encryptor's prefix.
    ///
    /// This is a prefix check only; the payload is not decoded.
    fn is_encrypted(&self, value: &str) -> bool;

    /// Returns the prefix this encryptor writes.
    fn prefix(&self) -> &str;
}

/// Encryption mode for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Fresh random nonce per call. Reveals nothing about equality.
    #[default]
    Randomized,
    /// Nonce derived from the plaintext. Equal plaintexts give equal
    /// envelopes, which enables equality search and leaks equality.
    Deterministic,
}

impl Mode {
    /// Returns the configuration name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Randomized => "randomized",
            Self::Deterministic => "deterministic",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "randomized" => Ok(Self::Randomized),
            "deterministic" => Ok(Self::Deterministic),
            other => Err(Error::InvalidArgument(format!(
                "unknown encryption mode '{other}' (expected randomized or deterministic)"
            ))),
        }
    }
}

/// Prefix and AAD settings plus the GCM seal/open steps.
#[derive(Clone)]
pub(crate) struct GcmEnvelope {
    prefix: String,
    aad: Vec<u8>,
}

impl GcmEnvelope {
    pub(crate) fn new(prefix: impl Into<String>, aad: Option<Vec<u8>>) -> Result<Self, Error> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(Error::InvalidArgument("envelope prefix must not be empty".to_string()));
        }
        Ok(Self { prefix, aad: aad.unwrap_or_default() })
    }

    pub(crate) fn default_for(prefix: &'static str) -> Self {
        Self { prefix: prefix.to_string(), aad: Vec::new() }
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(&self.prefix)
    }

    pub(crate) fn seal(
        &self,
        key: &KeyBytes,
        kid: Option<&str>,
        nonce: [u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<String, Error> {
        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| Error::EncryptionFailed(format!("invalid key: {e}")))?;

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), &self.aad, &mut buffer)
            .map_err(|_| Error::EncryptionFailed("AES-256-GCM rejected the input".to_string()))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);

        armor(&self.prefix, &Envelope::new(kid.map(str::to_string), nonce, tag_bytes, buffer))
    }

    pub(crate) fn open<P: KeyProvider + ?Sized>(
        &self,
        provider: &P,
        value: &str,
    ) -> Result<Vec<u8>, Error> {
        let envelope = unarmor(&self.prefix, value)?;
        let key = provider.key_by_id(envelope.kid())?;

        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| Error::EncryptionFailed(format!("invalid key: {e}")))?;

        let nonce = *envelope.nonce();
        let tag = *envelope.tag();
        let mut buffer = envelope.into_ciphertext();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                &self.aad,
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| Error::AuthenticationFailed)?;

        Ok(buffer)
    }
}

impl fmt::Debug for GcmEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcmEnvelope")
            .field("prefix", &self.prefix)
            .field("aad_len", &self.aad.len())
            .finish()
    }
}
