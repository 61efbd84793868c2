//! TOML configuration for building an engine.
//!
//! ```toml
//! aad = "app:v1"
//!
//! [key]
//! value = "env:APP_ENCRYPTION_KEY"
//! id = "v2"
//!
//! [rotated_keys]
//! v1 = "base64:..."
//!
//! [blind_index]
//! default_bits = 64
//! algorithm = "sha256"
//! ```
//!
//! Any key string of the form `env:NAME` is replaced by the value of the
//! environment variable `NAME` when the configuration is parsed.

use std::collections::BTreeMap;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::blind_index::{validate_bits, HashAlgorithm, DEFAULT_BITS};
use crate::cipher::{DEFAULT_DETERMINISTIC_PREFIX, DEFAULT_PREFIX};
use crate::engine::{EngineOptions, FieldCrypt};
use crate::envelope::MAX_KID_LEN;
use crate::error::Error;
use crate::key_provider::StaticKeyProvider;
use crate::mapping::FieldMap;

const ENV_PREFIX: &str = "env:";

/// The current encryption key.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyConfig {
    /// Encoded key, or `env:NAME`.
    pub value: SecretString,
    /// Identifier embedded in new envelopes.
    #[serde(default)]
    pub id: Option<String>,
}

/// Blind-index defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlindIndexConfig {
    #[serde(default = "default_bits")]
    pub default_bits: u32,
    #[serde(default)]
    pub algorithm: HashAlgorithm,
}

impl Default for BlindIndexConfig {
    fn default() -> Self {
        Self { default_bits: DEFAULT_BITS, algorithm: HashAlgorithm::default() }
    }
}

const fn default_bits() -> u32 {
    DEFAULT_BITS
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_deterministic_prefix() -> String {
    DEFAULT_DETERMINISTIC_PREFIX.to_string()
}

/// Engine configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub key: KeyConfig,
    /// Retired keys by id, kept for decryption.
    #[serde(default)]
    pub rotated_keys: BTreeMap<String, SecretString>,
    /// Dedicated blind-index key. Derived from the current key when absent.
    #[serde(default)]
    pub blind_index_key: Option<SecretString>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_deterministic_prefix")]
    pub deterministic_prefix: String,
    /// Static additional authenticated data.
    #[serde(default)]
    pub aad: Option<String>,
    #[serde(default)]
    pub blind_index: BlindIndexConfig,
    #[serde(default)]
    pub mapping: Option<FieldMap>,
}

impl EngineConfig {
    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, and any error from
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses a configuration, resolves `env:` references and validates it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Toml` for malformed TOML, `Error::Config` for a missing
    /// environment variable, and any error from [`EngineConfig::validate`].
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let mut config: Self = toml::from_str(contents)?;
        config.resolve_env()?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_env(&mut self) -> Result<(), Error> {
        self.key.value = from_env(&self.key.value)?;
        for value in self.rotated_keys.values_mut() {
            *value = from_env(value)?;
        }
        if let Some(value) = self.blind_index_key.as_mut() {
            *value = from_env(value)?;
        }
        Ok(())
    }

    /// Checks prefixes, key ids, bit width and the mapping.
    ///
    /// Key strings themselves are validated on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.prefix.is_empty() || self.deterministic_prefix.is_empty() {
            return Err(Error::InvalidArgument("envelope prefixes must not be empty".to_string()));
        }
        if self.prefix == self.deterministic_prefix {
            return Err(Error::InvalidArgument(
                "randomized and deterministic prefixes must differ".to_string(),
            ));
        }

        if self.rotated_keys.contains_key("") {
            return Err(Error::InvalidArgument("rotated key ids must not be empty".to_string()));
        }

        let ids = self.key.id.iter().chain(self.rotated_keys.keys());
        for id in ids {
            if id.len() > MAX_KID_LEN {
                return Err(Error::InvalidArgument(format!(
                    "key id is {} bytes, at most {MAX_KID_LEN} allowed",
                    id.len()
                )));
            }
        }

        validate_bits(self.blind_index.default_bits)?;

        if let Some(mapping) = &self.mapping {
            mapping.validate()?;
        }
        Ok(())
    }

    /// Engine options described by this configuration.
    #[must_use]
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            prefix: self.prefix.clone(),
            deterministic_prefix: self.deterministic_prefix.clone(),
            aad: self.aad.as_ref().map(|aad| aad.as_bytes().to_vec()),
            default_bits: self.blind_index.default_bits,
            algorithm: self.blind_index.algorithm,
        }
    }

    /// Builds the key provider described by this configuration.
    #[must_use]
    pub fn provider(&self) -> StaticKeyProvider {
        let mut provider = StaticKeyProvider::new(self.key.value.expose_secret().clone());
        if let Some(id) = &self.key.id {
            provider = provider.with_key_id(id.clone());
        }
        for (id, key) in &self.rotated_keys {
            provider = provider.with_rotated_key(id.clone(), key.expose_secret().clone());
        }
        if let Some(key) = &self.blind_index_key {
            provider = provider.with_blind_index_key(key.expose_secret().clone());
        }
        provider
    }
}

fn from_env(value: &SecretString) -> Result<SecretString, Error> {
    let raw = value.expose_secret();
    let Some(name) = raw.strip_prefix(ENV_PREFIX) else {
        return Ok(SecretString::new(raw.clone()));
    };

    debug!(var = %name, "resolving key from environment");
    std::env::var(name)
        .map(SecretString::new)
        .map_err(|_| Error::Config(format!("environment variable '{name}' is not set")))
}

impl FieldCrypt<StaticKeyProvider> {
    /// Builds an engine from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the configuration is invalid.
    pub fn from_config(config: &EngineConfig) -> Result<Self, Error> {
        config.validate()?;
        Self::new(config.provider(), config.options())
    }
}
