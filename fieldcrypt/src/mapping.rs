//! Static field mappings describing which record fields are encrypted.
//!
//! A [`FieldMap`] is declared in code, deserialized from configuration, or
//! generated by `#[derive(EncryptedFields)]`. The record layer reads it to
//! decide how every field is sealed and which blind-index columns to fill.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blind_index::validate_bits;
use crate::cipher::Mode;
use crate::error::Error;

/// How a field value is turned into plaintext bytes and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// UTF-8 text. Non-string scalars are stored by their JSON text.
    #[default]
    #[serde(alias = "string")]
    Text,
    /// Any JSON value, stored as its compact serialization.
    Json,
}

impl FieldKind {
    /// Returns the configuration name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    /// Converts a field value into plaintext.
    ///
    /// For [`FieldKind::Json`], a string holding valid JSON is decoded first,
    /// so it is restored as structured data. Other strings are kept as JSON
    /// strings.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if a JSON value cannot be serialized.
    pub fn to_plaintext(self, value: &Value) -> Result<Plaintext, Error> {
        match self {
            Self::Text => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(Plaintext::Text(text.into_bytes()))
            }
            Self::Json => {
                let bytes = match value {
                    Value::String(s) => match serde_json::from_str::<Value>(s) {
                        Ok(decoded) => serde_json::to_vec(&decoded)?,
                        Err(_) => serde_json::to_vec(value)?,
                    },
                    other => serde_json::to_vec(other)?,
                };
                Ok(Plaintext::Structured(bytes))
            }
        }
    }

    /// Restores a field value from decrypted bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEncoding` for text that is not UTF-8 and
    /// `Error::Serialization` for bytes that are not valid JSON.
    pub fn from_plaintext(self, bytes: Vec<u8>) -> Result<Value, Error> {
        match self {
            Self::Text => String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| Error::InvalidEncoding("decrypted text is not valid UTF-8".to_string())),
            Self::Json => Ok(serde_json::from_slice(&bytes)?),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "string" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidArgument(format!(
                "unknown field kind '{other}' (expected text, string or json)"
            ))),
        }
    }
}

/// Plaintext bytes tagged with how they were produced.
#[derive(Clone, PartialEq, Eq)]
pub enum Plaintext {
    /// UTF-8 text.
    Text(Vec<u8>),
    /// Serialized JSON.
    Structured(Vec<u8>),
}

impl Plaintext {
    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(bytes) | Self::Structured(bytes) => bytes,
        }
    }

    /// Returns the text used for blind indexing.
    #[must_use]
    pub fn index_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, len) = match self {
            Self::Text(bytes) => ("Text", bytes.len()),
            Self::Structured(bytes) => ("Structured", bytes.len()),
        };
        write!(f, "Plaintext::{name}([REDACTED; {len} bytes])")
    }
}

impl Drop for Plaintext {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        match self {
            Self::Text(bytes) | Self::Structured(bytes) => bytes.zeroize(),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// A blind-index column derived from an encrypted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlindIndexSpec {
    /// Column that receives the index.
    pub column: String,
    /// Domain-separation context. Defaults to `"Entity.field"`.
    #[serde(default)]
    pub context: Option<String>,
    /// Index width. Defaults to the engine default.
    #[serde(default)]
    pub bits: Option<u32>,
    /// Lowercase the value before hashing.
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

impl BlindIndexSpec {
    /// Creates a case-insensitive index spec with default context and width.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self { column: column.into(), context: None, bits: None, case_insensitive: true }
    }

    /// Sets an explicit context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the index width.
    #[must_use]
    pub const fn with_bits(mut self, bits: u32) -> Self {
        self.bits = Some(bits);
        self
    }

    /// Sets whether the value is lowercased before hashing.
    #[must_use]
    pub const fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Returns the context for this index on `entity.field`.
    #[must_use]
    pub fn context_for(&self, entity: &str, field: &str) -> String {
        self.context.clone().unwrap_or_else(|| format!("{entity}.{field}"))
    }
}

/// One encrypted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    /// Field name in the record.
    pub name: String,
    /// How the value is converted to plaintext.
    #[serde(default)]
    pub kind: FieldKind,
    /// Encryption mode for the value.
    #[serde(default)]
    pub mode: Mode,
    /// Whether null is stored as null. Non-nullable nulls are rejected.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Blind-index columns derived from the value.
    #[serde(default, rename = "blind_index")]
    pub blind_indexes: Vec<BlindIndexSpec>,
}

impl FieldSpec {
    /// Creates a nullable randomized text field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Text,
            mode: Mode::Randomized,
            nullable: true,
            blind_indexes: Vec::new(),
        }
    }

    /// Sets the value kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the encryption mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether null values are allowed.
    #[must_use]
    pub const fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Adds a blind-index column.
    #[must_use]
    pub fn with_blind_index(mut self, index: BlindIndexSpec) -> Self {
        self.blind_indexes.push(index);
        self
    }
}

/// The encrypted fields of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMap {
    /// Entity name, used in default blind-index contexts.
    pub entity: String,
    /// Encrypted fields in declaration order.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl FieldMap {
    /// Creates an empty mapping for `entity`.
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self { entity: entity.into(), fields: Vec::new() }
    }

    /// Adds an encrypted field.
    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks that field names and index columns are unique and non-empty,
    /// that no index column shadows an encrypted field, and that every
    /// explicit width is in range.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        if self.entity.is_empty() {
            return Err(Error::InvalidArgument("mapping entity must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "{}: field name must not be empty",
                    self.entity
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "{}: field '{}' is mapped twice",
                    self.entity, field.name
                )));
            }
        }

        let mut columns = HashSet::new();
        for field in &self.fields {
            for index in &field.blind_indexes {
                if index.column.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{}.{}: blind index column must not be empty",
                        self.entity, field.name
                    )));
                }
                if names.contains(index.column.as_str()) || !columns.insert(index.column.as_str()) {
                    return Err(Error::InvalidArgument(format!(
                        "{}.{}: blind index column '{}' is already in use",
                        self.entity, field.name, index.column
                    )));
                }
                if let Some(bits) = index.bits {
                    validate_bits(bits)?;
                }
            }
        }

        Ok(())
    }
}

/// Types that declare their encrypted fields.
///
/// Usually implemented with `#[derive(EncryptedFields)]` from
/// `fieldcrypt-derive`.
pub trait EncryptedFields {
    /// Returns the field mapping for this type.
    fn field_map() -> FieldMap;
}
