//! # `fieldcrypt`
//!
//! Field-level encryption for values stored in a database.
//!
//! ## Features
//!
//! - Randomized AES-256-GCM encryption (fresh nonce per call)
//! - Deterministic AES-256-GCM encryption for equality lookups
//! - Blind indexes: truncated HMAC digests for searching encrypted columns
//! - Self-describing envelopes carrying the key id, for key rotation
//! - Record sealing driven by a static field mapping
//!
//! ## Example
//!
//! ```rust
//! use fieldcrypt::prelude::*;
//!
//! # fn main() -> Result<(), fieldcrypt::Error> {
//! let provider = StaticKeyProvider::new("01234567890123456789012345678901")
//!     .with_key_id("v2")
//!     .with_rotated_key("v1", "base64:YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXowMTIzNDU=");
//! let engine = FieldCrypt::new(provider, EngineOptions::default())?;
//!
//! let envelope = engine.encrypt(b"alice@example.com", Mode::Deterministic)?;
//! assert_eq!(engine.decrypt(&envelope)?, b"alice@example.com");
//! assert_eq!(engine.key_id_of(&envelope)?.as_deref(), Some("v2"));
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod cipher;
pub mod config;
pub mod deterministic;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod key;
pub mod key_provider;
pub mod mapping;
pub mod randomized;
pub mod record;

pub use cipher::Mode;
pub use engine::{EngineOptions, FieldCrypt};
pub use error::{Error, KeyError, Result};

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::{normalize, BlindIndexer, HashAlgorithm};
    pub use crate::cipher::{Encryptor, Mode};
    pub use crate::config::EngineConfig;
    pub use crate::deterministic::DeterministicEncryptor;
    pub use crate::engine::{EngineOptions, FieldCrypt};
    pub use crate::error::{Error, KeyError};
    pub use crate::key_provider::{KeyProvider, StaticKeyProvider};
    pub use crate::mapping::{BlindIndexSpec, EncryptedFields, FieldKind, FieldMap, FieldSpec};
    pub use crate::randomized::RandomizedEncryptor;
    pub use crate::record::{RecordCipher, Row};
}
