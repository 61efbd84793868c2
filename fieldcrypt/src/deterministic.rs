//! Deterministic AES-256-GCM encryption for equality queries.
//!
//! The nonce is derived from the plaintext:
//!
//! ```text
//! iv_key = SHA-256(current_key || ":iv-derivation")
//! nonce  = HMAC-SHA256(iv_key, plaintext)[..12]
//! ```
//!
//! The nonce-derivation key is separate from the data-encryption key so the
//! same key is never used for both the MAC and the cipher.
//!
//! # Security Properties
//!
//! - **Deterministic**: same plaintext + key + AAD → byte-identical envelope
//! - **Authenticated**: tampering, a wrong key or a wrong AAD fail to decrypt
//! - **AAD-bound**: changing the AAD changes every envelope, so the AAD must
//!   stay constant for a searchable field
//!
//! # Security Warning
//!
//! Deterministic encryption reveals which stored values are equal. Use it only
//! for fields that need exact-match lookups; everything else should use
//! [`RandomizedEncryptor`](crate::randomized::RandomizedEncryptor).

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::cipher::{Encryptor, GcmEnvelope, DEFAULT_DETERMINISTIC_PREFIX};
use crate::envelope::NONCE_LEN;
use crate::error::Error;
use crate::key::{derive_subkey, KeyBytes};
use crate::key_provider::KeyProvider;

type HmacSha256 = Hmac<Sha256>;

const IV_DERIVATION_LABEL: &[u8] = b":iv-derivation";

/// Deterministic encryptor.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fieldcrypt::cipher::Encryptor;
/// use fieldcrypt::deterministic::DeterministicEncryptor;
/// use fieldcrypt::key_provider::StaticKeyProvider;
///
/// # fn main() -> Result<(), fieldcrypt::Error> {
/// let provider = Arc::new(StaticKeyProvider::new("01234567890123456789012345678901"));
/// let encryptor = DeterministicEncryptor::new(provider);
///
/// let first = encryptor.encrypt(b"alice@example.com")?;
/// let second = encryptor.encrypt(b"alice@example.com")?;
/// assert_eq!(first, second);
/// # Ok(())
/// # }
/// ```
pub struct DeterministicEncryptor<P: KeyProvider> {
    provider: Arc<P>,
    envelope: GcmEnvelope,
}

impl<P: KeyProvider> DeterministicEncryptor<P> {
    /// Creates an encryptor with the default prefix and no AAD.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider, envelope: GcmEnvelope::default_for(DEFAULT_DETERMINISTIC_PREFIX) }
    }

    /// Creates an encryptor with a custom prefix and optional static AAD.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the prefix is empty.
    pub fn with_options(
        provider: Arc<P>,
        prefix: impl Into<String>,
        aad: Option<Vec<u8>>,
    ) -> Result<Self, Error> {
        Ok(Self { provider, envelope: GcmEnvelope::new(prefix, aad)? })
    }
}

/// Derives the synthetic nonce for `plaintext` under `key`.
fn derive_nonce(key: &KeyBytes, plaintext: &[u8]) -> Result<[u8; NONCE_LEN], Error> {
    let iv_key = derive_subkey(key, IV_DERIVATION_LABEL);

    let mut mac = HmacSha256::new_from_slice(iv_key.expose())
        .map_err(|e| Error::EncryptionFailed(format!("invalid nonce-derivation key: {e}")))?;
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    Ok(nonce)
}

impl<P: KeyProvider> Encryptor for DeterministicEncryptor<P> {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        let key = self.provider.current_key()?;
        let nonce = derive_nonce(key, plaintext)?;
        self.envelope.seal(key, self.provider.current_key_id(), nonce, plaintext)
    }

    fn decrypt(&self, value: &str) -> Result<Vec<u8>, Error> {
        self.envelope.open(self.provider.as_ref(), value)
    }

    fn is_encrypted(&self, value: &str) -> bool {
        self.envelope.is_encrypted(value)
    }

    fn prefix(&self) -> &str {
        self.envelope.prefix()
    }
}

impl<P: KeyProvider> Clone for DeterministicEncryptor<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), envelope: self.envelope.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::unarmor;
    use crate::key::resolve;
    use crate::key_provider::StaticKeyProvider;

    const KEY: &str = "01234567890123456789012345678901";

    fn create_test_encryptor() -> DeterministicEncryptor<StaticKeyProvider> {
        DeterministicEncryptor::new(Arc::new(StaticKeyProvider::new(KEY).with_key_id("k1")))
    }

    #[test]
    fn test_deterministic_encryption() {
        let encryptor = create_test_encryptor();
        let plaintext = b"alice@example.com";

        let ciphertext1 = encryptor.encrypt(plaintext).unwrap();
        let ciphertext2 = encryptor.encrypt(plaintext).unwrap();

        assert_eq!(ciphertext1, ciphertext2, "Encryption must be deterministic");
        assert!(ciphertext1.starts_with("DET$1$"));
    }

    #[test]
    fn test_deterministic_decrypt() {
        let encryptor = create_test_encryptor();
        let ciphertext = encryptor.encrypt(b"alice@example.com").unwrap();
        assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), b"alice@example.com");
    }

    #[test]
    fn test_different_plaintexts_different_ciphertexts() {
        let encryptor = create_test_encryptor();
        let ct1 = encryptor.encrypt(b"alice@example.com").unwrap();
        let ct2 = encryptor.encrypt(b"bob@example.com").unwrap();
        assert_ne!(ct1, ct2, "Different plaintexts must produce different ciphertexts");
    }

    #[test]
    fn test_nonce_is_truncated_hmac_of_plaintext() {
        let encryptor = create_test_encryptor();
        let envelope = unarmor("DET$1$", &encryptor.encrypt(b"alice").unwrap()).unwrap();

        let key = resolve(KEY).unwrap();
        let iv_key = derive_subkey(&key, IV_DERIVATION_LABEL);
        let mut mac = HmacSha256::new_from_slice(iv_key.expose()).unwrap();
        mac.update(b"alice");
        let expected = mac.finalize().into_bytes();

        assert_eq!(envelope.nonce().as_slice(), &expected[..NONCE_LEN]);
        assert_eq!(envelope.kid(), Some("k1"));
    }

    #[test]
    fn test_separate_instances_agree() {
        let a = create_test_encryptor();
        let b = create_test_encryptor();
        assert_eq!(a.encrypt(b"same").unwrap(), b.encrypt(b"same").unwrap());
    }

    #[test]
    fn test_aad_changes_envelope() {
        let provider = Arc::new(StaticKeyProvider::new(KEY));
        let plain = DeterministicEncryptor::new(Arc::clone(&provider));
        let bound =
            DeterministicEncryptor::with_options(provider, "DET$1$", Some(b"users.email".to_vec()))
                .unwrap();

        let without = plain.encrypt(b"alice").unwrap();
        let with = bound.encrypt(b"alice").unwrap();

        assert_ne!(without, with);
        assert!(matches!(plain.decrypt(&with), Err(Error::AuthenticationFailed)));
        assert_eq!(bound.decrypt(&with).unwrap(), b"alice");
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let encryptor = create_test_encryptor();
        let envelope = unarmor("DET$1$", &encryptor.encrypt(b"alice").unwrap()).unwrap();

        let mut ciphertext = envelope.ciphertext().to_vec();
        ciphertext[0] ^= 0xFF;
        let tampered = crate::envelope::armor(
            "DET$1$",
            &crate::envelope::Envelope::new(
                envelope.kid().map(str::to_string),
                *envelope.nonce(),
                *envelope.tag(),
                ciphertext,
            ),
        )
        .unwrap();

        assert!(matches!(encryptor.decrypt(&tampered), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_empty_and_large_plaintext() {
        let encryptor = create_test_encryptor();

        let empty = encryptor.encrypt(b"").unwrap();
        assert!(encryptor.decrypt(&empty).unwrap().is_empty());

        let large = vec![0x42; 10_000];
        let ciphertext = encryptor.encrypt(&large).unwrap();
        assert_eq!(encryptor.decrypt(&ciphertext).unwrap(), large);
    }

    #[test]
    fn test_encryptor_clone() {
        let encryptor1 = create_test_encryptor();
        let encryptor2 = encryptor1.clone();
        assert_eq!(encryptor1.encrypt(b"x").unwrap(), encryptor2.encrypt(b"x").unwrap());
    }
}
