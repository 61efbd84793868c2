//! Randomized AES-256-GCM encryption.
//!
//! Every call draws a fresh 96-bit nonce from the operating system CSPRNG, so
//! encrypting the same plaintext twice yields unrelated envelopes. This is the
//! default mode and the right choice for any field that is never searched by
//! exact value.

use std::sync::Arc;

use aes_gcm::aead::{rand_core::RngCore, OsRng};

use crate::cipher::{Encryptor, GcmEnvelope, DEFAULT_PREFIX};
use crate::envelope::NONCE_LEN;
use crate::error::Error;
use crate::key_provider::KeyProvider;

/// Randomized encryptor.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fieldcrypt::cipher::Encryptor;
/// use fieldcrypt::key_provider::StaticKeyProvider;
/// use fieldcrypt::randomized::RandomizedEncryptor;
///
/// # fn main() -> Result<(), fieldcrypt::Error> {
/// let provider = Arc::new(StaticKeyProvider::new("01234567890123456789012345678901").with_key_id("k1"));
/// let encryptor = RandomizedEncryptor::new(provider);
///
/// let envelope = encryptor.encrypt(b"alice@example.com")?;
/// assert!(encryptor.is_encrypted(&envelope));
/// assert_eq!(encryptor.decrypt(&envelope)?, b"alice@example.com");
/// # Ok(())
/// # }
/// ```
pub struct RandomizedEncryptor<P: KeyProvider> {
    provider: Arc<P>,
    envelope: GcmEnvelope,
}

impl<P: KeyProvider> RandomizedEncryptor<P> {
    /// Creates an encryptor with the default prefix and no AAD.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider, envelope: GcmEnvelope::default_for(DEFAULT_PREFIX) }
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

impl<P: KeyProvider> Encryptor for RandomizedEncryptor<P> {
    fn encrypt(&self, plaintext: &[u8]) -> Result<String, Error> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let key = self.provider.current_key()?;
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

impl<P: KeyProvider> Clone for RandomizedEncryptor<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider), envelope: self.envelope.clone() }
    }
}
