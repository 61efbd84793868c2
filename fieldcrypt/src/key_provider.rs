//! Key provider abstraction for key management.

use std::sync::OnceLock;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::KeyError;
use crate::key::{derive_subkey, resolve, KeyBytes};

const BLIND_INDEX_LABEL: &[u8] = b":blind-index";

/// Supplies key material to the encryptors and the blind indexer.
///
/// Implementations must be thread-safe (`Send + Sync`) to support
/// concurrent encryption operations.
pub trait KeyProvider: Send + Sync {
    /// Returns the key used for all new encryptions.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` if the configured material is malformed.
    fn current_key(&self) -> Result<&KeyBytes, KeyError>;

    /// Returns the identifier embedded in new envelopes, if any.
    fn current_key_id(&self) -> Option<&str>;

    /// Returns the key for an envelope's embedded identifier.
    ///
    /// `None`, or the current identifier, selects the current key. Any other
    /// identifier must be a rotated key; an unknown identifier is an error and
    /// is never answered with the current key.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::NotFound` for unknown identifiers and
    /// `KeyError::InvalidKey` for malformed material.
    fn key_by_id(&self, id: Option<&str>) -> Result<&KeyBytes, KeyError>;

    /// Returns the key for blind index generation.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` if the configured material is malformed.
    fn blind_index_key(&self) -> Result<&KeyBytes, KeyError>;

    /// Returns every known key identifier, current first, for re-encryption
    /// tooling.
    fn all_key_ids(&self) -> Vec<String>;
}

/// An encoded key plus its lazily resolved bytes.
struct LazyKey {
    encoded: SecretString,
    resolved: OnceLock<KeyBytes>,
}

impl LazyKey {
    fn new(encoded: impl Into<String>) -> Self {
        Self { encoded: SecretString::new(encoded.into()), resolved: OnceLock::new() }
    }

    // Resolution is deterministic, so a racing second resolution produces the
    // same bytes and is simply dropped by `get_or_init`.
    fn get(&self) -> Result<&KeyBytes, KeyError> {
        if let Some(key) = self.resolved.get() {
            return Ok(key);
        }
        let key = resolve(self.encoded.expose_secret())?;
        Ok(self.resolved.get_or_init(|| key))
    }
}

/// Key provider backed by configured key strings.
///
/// Holds one current key, any number of rotated keys used only for
/// decryption, and an optional explicit blind-index key. When no blind-index
/// key is configured it is derived as `SHA-256(current || ":blind-index")`.
///
/// # Example
///
/// ```
/// use fieldcrypt::key_provider::{KeyProvider, StaticKeyProvider};
///
/// let provider = StaticKeyProvider::new("01234567890123456789012345678901")
///     .with_key_id("v2")
///     .with_rotated_key("v1", "hex:000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");
///
/// assert_eq!(provider.all_key_ids(), vec!["v2".to_string(), "v1".to_string()]);
/// assert!(provider.key_by_id(Some("v1")).is_ok());
/// assert!(provider.key_by_id(Some("v0")).is_err());
/// ```
pub struct StaticKeyProvider {
    current: LazyKey,
    current_id: Option<String>,
    rotated: Vec<(String, LazyKey)>,
    blind_index: Option<LazyKey>,
    derived_blind_index: OnceLock<KeyBytes>,
}

impl StaticKeyProvider {
    /// Creates a provider whose current key is the given encoded string.
    ///
    /// The string is validated on first use, not here.
    #[must_use]
    pub fn new(current_key: impl Into<String>) -> Self {
        Self {
            current: LazyKey::new(current_key),
            current_id: None,
            rotated: Vec::new(),
            blind_index: None,
            derived_blind_index: OnceLock::new(),
        }
    }

    /// Sets the identifier embedded in new envelopes.
    ///
    /// An empty identifier means "no key id", matching how envelopes store it.
    #[must_use]
    pub fn with_key_id(mut self, id: impl Into<String>) -> Self {
        self.current_id = Some(id.into()).filter(|id| !id.is_empty());
        self.warn_if_aliased();
        self
    }

    /// Adds a retired key that remains available for decryption.
    ///
    /// Re-adding an identifier replaces the earlier entry in place.
    #[must_use]
    pub fn with_rotated_key(mut self, id: impl Into<String>, key: impl Into<String>) -> Self {
        let id = id.into();
        let entry = LazyKey::new(key);
        match self.rotated.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = entry,
            None => self.rotated.push((id, entry)),
        }
        self.warn_if_aliased();
        self
    }

    /// Returns the current key id if a rotated key shares it.
    fn aliased_id(&self) -> Option<&str> {
        let current = self.current_id.as_deref()?;
        self.rotated.iter().any(|(id, _)| id == current).then_some(current)
    }

    fn warn_if_aliased(&self) {
        if let Some(id) = self.aliased_id() {
            warn!(kid = %id, "rotated key id aliases the current key id; the current key wins");
        }
    }

    /// Uses a dedicated key for blind indexes instead of deriving one.
    #[must_use]
    pub fn with_blind_index_key(mut self, key: impl Into<String>) -> Self {
        self.blind_index = Some(LazyKey::new(key));
        self
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_key(&self) -> Result<&KeyBytes, KeyError> {
        self.current.get()
    }

    fn current_key_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    fn key_by_id(&self, id: Option<&str>) -> Result<&KeyBytes, KeyError> {
        let Some(id) = id else {
            return self.current_key();
        };
        if self.current_id.as_deref() == Some(id) {
            return self.current_key();
        }

        debug!(kid = %id, "looking up rotated key");
        self.rotated
            .iter()
            .find(|(rotated_id, _)| rotated_id == id)
            .ok_or_else(|| KeyError::NotFound(id.to_string()))?
            .1
            .get()
    }

    fn blind_index_key(&self) -> Result<&KeyBytes, KeyError> {
        if let Some(configured) = &self.blind_index {
            return configured.get();
        }
        if let Some(derived) = self.derived_blind_index.get() {
            return Ok(derived);
        }
        let derived = derive_subkey(self.current_key()?, BLIND_INDEX_LABEL);
        Ok(self.derived_blind_index.get_or_init(|| derived))
    }

    fn all_key_ids(&self) -> Vec<String> {
        self.current_id
            .iter()
            .cloned()
            .chain(self.rotated.iter().map(|(id, _)| id.clone()))
            .collect()
    }
}

impl std::fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("current_id", &self.current_id)
            .field("rotated_ids", &self.rotated.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .field("dedicated_blind_index_key", &self.blind_index.is_some())
            .finish_non_exhaustive()
    }
}
