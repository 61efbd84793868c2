//! Engine facade combining both encryptors and the blind indexer.
//!
//! This is the surface an ORM or storage layer calls: encrypt in a chosen
//! mode, decrypt with the mode detected from the envelope prefix, test whether
//! a stored value is already encrypted, compute blind indexes, and enumerate
//! key ids for re-encryption.

use std::sync::Arc;

use tracing::debug;

use crate::blind_index::{BlindIndexer, HashAlgorithm, DEFAULT_BITS};
use crate::cipher::{Encryptor, Mode, DEFAULT_DETERMINISTIC_PREFIX, DEFAULT_PREFIX};
use crate::deterministic::DeterministicEncryptor;
use crate::envelope::unarmor;
use crate::error::Error;
use crate::key_provider::KeyProvider;
use crate::randomized::RandomizedEncryptor;

/// Engine settings that are not key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Prefix for randomized envelopes.
    pub prefix: String,
    /// Prefix for deterministic envelopes.
    pub deterministic_prefix: String,
    /// Static additional authenticated data for both modes.
    pub aad: Option<Vec<u8>>,
    /// Blind index width used when a caller does not request one.
    pub default_bits: u32,
    /// Blind index HMAC hash function.
    pub algorithm: HashAlgorithm,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            deterministic_prefix: DEFAULT_DETERMINISTIC_PREFIX.to_string(),
            aad: None,
            default_bits: DEFAULT_BITS,
            algorithm: HashAlgorithm::default(),
        }
    }
}

/// Field encryption engine.
///
/// # Example
///
/// ```
/// use fieldcrypt::prelude::*;
///
/// # fn main() -> Result<(), fieldcrypt::Error> {
/// let provider = StaticKeyProvider::new("01234567890123456789012345678901").with_key_id("k1");
/// let engine = FieldCrypt::new(provider, EngineOptions::default())?;
///
/// let envelope = engine.encrypt(b"hello world", Mode::Randomized)?;
/// assert!(envelope.starts_with("ENC$1$"));
/// assert_eq!(engine.decrypt(&envelope)?, b"hello world");
///
/// let index = engine.blind_index("a@b.com", "User.email", Some(64))?;
/// assert_eq!(index.len(), 16);
/// # Ok(())
/// # }
/// ```
pub struct FieldCrypt<P: KeyProvider> {
    provider: Arc<P>,
    randomized: RandomizedEncryptor<P>,
    deterministic: DeterministicEncryptor<P>,
    indexer: BlindIndexer<P>,
}

impl<P: KeyProvider> FieldCrypt<P> {
    /// Creates an engine over `provider`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if a prefix is empty, the two prefixes
    /// are equal, or the default bit width is out of range.
    pub fn new(provider: P, options: EngineOptions) -> Result<Self, Error> {
        Self::from_shared(Arc::new(provider), options)
    }

    /// Creates an engine over a provider that is already shared.
    ///
    /// # Errors
    ///
    /// See [`FieldCrypt::new`].
    pub fn from_shared(provider: Arc<P>, options: EngineOptions) -> Result<Self, Error> {
        if options.prefix == options.deterministic_prefix {
            return Err(Error::InvalidArgument(
                "randomized and deterministic prefixes must differ".to_string(),
            ));
        }

        let randomized = RandomizedEncryptor::with_options(
            Arc::clone(&provider),
            options.prefix,
            options.aad.clone(),
        )?;
        let deterministic = DeterministicEncryptor::with_options(
            Arc::clone(&provider),
            options.deterministic_prefix,
            options.aad,
        )?;
        let indexer =
            BlindIndexer::with_options(Arc::clone(&provider), options.algorithm, options.default_bits)?;

        Ok(Self { provider, randomized, deterministic, indexer })
    }

    /// Returns the key provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns the randomized encryptor.
    #[must_use]
    pub const fn randomized(&self) -> &RandomizedEncryptor<P> {
        &self.randomized
    }

    /// Returns the deterministic encryptor.
    #[must_use]
    pub const fn deterministic(&self) -> &DeterministicEncryptor<P> {
        &self.deterministic
    }

    /// Returns the blind indexer.
    #[must_use]
    pub const fn indexer(&self) -> &BlindIndexer<P> {
        &self.indexer
    }

    fn encryptor(&self, mode: Mode) -> &dyn Encryptor {
        match mode {
            Mode::Randomized => &self.randomized,
            Mode::Deterministic => &self.deterministic,
        }
    }

    /// Encrypts `plaintext` in the given mode under the current key.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key is invalid or the envelope cannot
    /// be built.
    pub fn encrypt(&self, plaintext: &[u8], mode: Mode) -> Result<String, Error> {
        self.encryptor(mode).encrypt(plaintext)
    }

    /// Decrypts an envelope of either mode.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` if neither prefix matches, and otherwise
    /// whatever the matching encryptor reports.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, Error> {
        let mode = self.mode_of(envelope).ok_or(Error::InvalidFormat)?;
        self.encryptor(mode).decrypt(envelope)
    }

    /// Returns `true` if `value` carries either envelope prefix.
    #[must_use]
    pub fn is_encrypted(&self, value: &str) -> bool {
        self.mode_of(value).is_some()
    }

    /// Detects the mode of an envelope from its prefix.
    ///
    /// When one prefix is a prefix of the other, the longer one is tested
    /// first.
    #[must_use]
    pub fn mode_of(&self, value: &str) -> Option<Mode> {
        let mut candidates = [Mode::Randomized, Mode::Deterministic];
        candidates.sort_by_key(|mode| std::cmp::Reverse(self.encryptor(*mode).prefix().len()));
        candidates.into_iter().find(|mode| self.encryptor(*mode).is_encrypted(value))
    }

    /// Computes a blind index. `bits` defaults to the configured width.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `bits` is outside `[16, 256]`.
    pub fn blind_index(&self, value: &str, context: &str, bits: Option<u32>) -> Result<String, Error> {
        self.indexer.generate(value, context, bits)
    }

    /// Returns every configured key id, current first.
    #[must_use]
    pub fn all_key_ids(&self) -> Vec<String> {
        self.provider.all_key_ids()
    }

    /// Reads the key id embedded in an envelope without decrypting it.
    ///
    /// # Errors
    ///
    /// Returns a format error if `envelope` is not a well-formed envelope.
    pub fn key_id_of(&self, envelope: &str) -> Result<Option<String>, Error> {
        let mode = self.mode_of(envelope).ok_or(Error::InvalidFormat)?;
        let parsed = unarmor(self.encryptor(mode).prefix(), envelope)?;
        Ok(parsed.kid().map(str::to_string))
    }

    /// Returns `true` if `envelope` was not written in `mode` under the
    /// current key id.
    ///
    /// Envelopes without a key id are considered current when the provider
    /// has no current key id either.
    ///
    /// # Errors
    ///
    /// Returns a format error if `envelope` is not a well-formed envelope.
    pub fn needs_reencryption(&self, envelope: &str, mode: Mode) -> Result<bool, Error> {
        if self.mode_of(envelope) != Some(mode) {
            return Ok(true);
        }
        let kid = self.key_id_of(envelope)?;
        Ok(kid.as_deref() != self.provider.current_key_id())
    }

    /// Decrypts `envelope` and encrypts the plaintext again in `mode` under
    /// the current key.
    ///
    /// # Errors
    ///
    /// Returns any decryption or encryption error.
    pub fn reencrypt(&self, envelope: &str, mode: Mode) -> Result<String, Error> {
        let plaintext = zeroize::Zeroizing::new(self.decrypt(envelope)?);
        debug!(%mode, "re-encrypting envelope under current key");
        self.encrypt(&plaintext, mode)
    }
}

impl<P: KeyProvider> Clone for FieldCrypt<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            randomized: self.randomized.clone(),
            deterministic: self.deterministic.clone(),
            indexer: self.indexer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyError;
    use crate::key_provider::StaticKeyProvider;

    const KEY: &str = "01234567890123456789012345678901";
    const OLD: &str = "abcdefghijklmnopqrstuvwxyz012345";

    fn engine(kid: &str) -> FieldCrypt<StaticKeyProvider> {
        FieldCrypt::new(StaticKeyProvider::new(KEY).with_key_id(kid), EngineOptions::default())
            .unwrap()
    }

    #[test]
    fn test_decrypt_detects_mode() {
        let engine = engine("k1");
        let randomized = engine.encrypt(b"value", Mode::Randomized).unwrap();
        let deterministic = engine.encrypt(b"value", Mode::Deterministic).unwrap();

        assert_eq!(engine.mode_of(&randomized), Some(Mode::Randomized));
        assert_eq!(engine.mode_of(&deterministic), Some(Mode::Deterministic));
        assert_eq!(engine.decrypt(&randomized).unwrap(), b"value");
        assert_eq!(engine.decrypt(&deterministic).unwrap(), b"value");
    }

    #[test]
    fn test_plain_values() {
        let engine = engine("k1");
        assert!(!engine.is_encrypted("hello"));
        assert!(matches!(engine.decrypt("hello"), Err(Error::InvalidFormat)));
    }

    #[test]
    fn test_equal_prefixes_rejected() {
        let options = EngineOptions {
            deterministic_prefix: DEFAULT_PREFIX.to_string(),
            ..EngineOptions::default()
        };
        let result = FieldCrypt::new(StaticKeyProvider::new(KEY), options);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_overlapping_prefixes_prefer_longer() {
        let options = EngineOptions {
            prefix: "ENC:".to_string(),
            deterministic_prefix: "ENC:D:".to_string(),
            ..EngineOptions::default()
        };
        let engine = FieldCrypt::new(StaticKeyProvider::new(KEY), options).unwrap();

        let deterministic = engine.encrypt(b"v", Mode::Deterministic).unwrap();
        assert_eq!(engine.mode_of(&deterministic), Some(Mode::Deterministic));
        assert_eq!(engine.decrypt(&deterministic).unwrap(), b"v");
    }

    #[test]
    fn test_key_id_of() {
        let engine = engine("k1");
        let envelope = engine.encrypt(b"v", Mode::Randomized).unwrap();
        assert_eq!(engine.key_id_of(&envelope).unwrap().as_deref(), Some("k1"));
        assert!(matches!(engine.key_id_of("plain"), Err(Error::InvalidFormat)));
    }

    #[test]
    fn test_rotation_helpers() {
        let old = FieldCrypt::new(StaticKeyProvider::new(OLD).with_key_id("v1"), EngineOptions::default())
            .unwrap();
        let envelope = old.encrypt(b"secret", Mode::Deterministic).unwrap();

        let new = FieldCrypt::new(
            StaticKeyProvider::new(KEY).with_key_id("v2").with_rotated_key("v1", OLD),
            EngineOptions::default(),
        )
        .unwrap();

        assert_eq!(new.all_key_ids(), vec!["v2", "v1"]);
        assert!(new.needs_reencryption(&envelope, Mode::Deterministic).unwrap());
        assert!(new.needs_reencryption(&envelope, Mode::Randomized).unwrap());

        let rotated = new.reencrypt(&envelope, Mode::Deterministic).unwrap();
        assert_eq!(new.key_id_of(&rotated).unwrap().as_deref(), Some("v2"));
        assert!(!new.needs_reencryption(&rotated, Mode::Deterministic).unwrap());
        assert_eq!(new.decrypt(&rotated).unwrap(), b"secret");
    }

    #[test]
    fn test_reencrypt_unknown_key_fails() {
        let envelope = engine("gone").encrypt(b"v", Mode::Randomized).unwrap();
        let result = engine("k1").reencrypt(&envelope, Mode::Randomized);
        assert!(matches!(result, Err(Error::Key(KeyError::NotFound(_)))));
    }

    #[test]
    fn test_aad_applies_to_both_modes() {
        let with_aad = FieldCrypt::new(
            StaticKeyProvider::new(KEY),
            EngineOptions { aad: Some(b"app:v1".to_vec()), ..EngineOptions::default() },
        )
        .unwrap();
        let without = FieldCrypt::new(StaticKeyProvider::new(KEY), EngineOptions::default()).unwrap();

        for mode in [Mode::Randomized, Mode::Deterministic] {
            let envelope = with_aad.encrypt(b"v", mode).unwrap();
            assert!(matches!(without.decrypt(&envelope), Err(Error::AuthenticationFailed)));
        }
    }
}
