//! Record-level sealing driven by a [`FieldMap`].
//!
//! Rows are JSON objects. Sealing replaces every mapped field with its
//! envelope and fills the field's blind-index columns; opening restores the
//! original values. Unmapped fields are never touched.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::blind_index::normalize;
use crate::engine::FieldCrypt;
use crate::error::Error;
use crate::key_provider::KeyProvider;
use crate::mapping::{FieldKind, FieldMap, FieldSpec, Plaintext};

/// A JSON row.
pub type Row = Map<String, Value>;

/// Seals and opens rows for one entity.
///
/// # Example
///
/// ```
/// use fieldcrypt::prelude::*;
/// use serde_json::json;
///
/// # fn main() -> Result<(), fieldcrypt::Error> {
/// let engine = FieldCrypt::new(
///     StaticKeyProvider::new("01234567890123456789012345678901"),
///     EngineOptions::default(),
/// )?;
/// let map = FieldMap::new("User").with_field(
///     FieldSpec::new("email").with_blind_index(BlindIndexSpec::new("email_bidx")),
/// );
/// let records = RecordCipher::new(&engine, &map)?;
///
/// let mut row = json!({"id": 1, "email": "Alice@Example.com"}).as_object().cloned().unwrap_or_default();
/// records.seal(&mut row)?;
/// assert!(row["email"].as_str().is_some_and(|v| v.starts_with("ENC$1$")));
///
/// records.open(&mut row)?;
/// assert_eq!(row["email"], "Alice@Example.com");
/// # Ok(())
/// # }
/// ```
pub struct RecordCipher<'a, P: KeyProvider> {
    engine: &'a FieldCrypt<P>,
    map: &'a FieldMap,
}

impl<'a, P: KeyProvider> RecordCipher<'a, P> {
    /// Creates a record cipher after validating `map`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the map is invalid.
    pub fn new(engine: &'a FieldCrypt<P>, map: &'a FieldMap) -> Result<Self, Error> {
        map.validate()?;
        Ok(Self { engine, map })
    }

    /// Returns the mapping this cipher applies.
    #[must_use]
    pub const fn map(&self) -> &FieldMap {
        self.map
    }

    /// Encrypts every mapped field in `row` and fills its blind-index
    /// columns.
    ///
    /// Values that are already envelopes are left alone, so sealing twice is
    /// harmless. On error `row` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingValue` for a null non-nullable field, and any
    /// encryption or indexing error.
    pub fn seal(&self, row: &mut Row) -> Result<(), Error> {
        let mut sealed = row.clone();
        for field in &self.map.fields {
            let value = match sealed.get(&field.name) {
                None => continue,
                Some(Value::Null) => {
                    self.seal_null(&mut sealed, field)?;
                    continue;
                }
                Some(Value::String(s)) if self.engine.is_encrypted(s) => continue,
                Some(value) => value,
            };

            let plaintext = field.kind.to_plaintext(value)?;
            self.seal_plaintext(&mut sealed, field, &plaintext)?;
        }
        *row = sealed;
        Ok(())
    }

    /// Decrypts every mapped field in `row` that holds an envelope.
    ///
    /// Plain strings are returned unchanged. On error `row` is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns any decryption error, `Error::InvalidEncoding` for text fields
    /// that do not decrypt to UTF-8, and `Error::Serialization` for JSON
    /// fields that do not decrypt to JSON.
    pub fn open(&self, row: &mut Row) -> Result<(), Error> {
        let mut opened = row.clone();
        for field in &self.map.fields {
            let Some(Value::String(stored)) = opened.get(&field.name) else {
                continue;
            };
            if !self.engine.is_encrypted(stored) {
                debug!(entity = %self.map.entity, field = %field.name, "leaving unencrypted value as is");
                continue;
            }

            let bytes = self.engine.decrypt(stored)?;
            let value = field.kind.from_plaintext(bytes)?;
            opened.insert(field.name.clone(), value);
        }
        *row = opened;
        Ok(())
    }

    /// Brings every mapped field up to date with the current key and the
    /// field's mode.
    ///
    /// Envelopes written under another key id or in another mode are
    /// re-encrypted, plaintext values are sealed, and blind indexes of
    /// rewritten fields are recomputed. Returns the number of fields
    /// rewritten. On error `row` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns any decryption, encryption or indexing error.
    pub fn reseal(&self, row: &mut Row) -> Result<usize, Error> {
        let mut resealed = row.clone();
        let mut rewritten = 0;

        for field in &self.map.fields {
            let plaintext = match resealed.get(&field.name) {
                None | Some(Value::Null) => continue,
                Some(Value::String(stored)) if self.engine.is_encrypted(stored) => {
                    if !self.engine.needs_reencryption(stored, field.mode)? {
                        continue;
                    }
                    wrap(field.kind, self.engine.decrypt(stored)?)
                }
                Some(value) => {
                    warn!(entity = %self.map.entity, field = %field.name, "sealing unencrypted value");
                    field.kind.to_plaintext(value)?
                }
            };

            self.seal_plaintext(&mut resealed, field, &plaintext)?;
            rewritten += 1;
        }
        *row = resealed;

        if rewritten > 0 {
            debug!(entity = %self.map.entity, rewritten, "row resealed");
        }
        Ok(rewritten)
    }

    fn seal_null(&self, row: &mut Row, field: &FieldSpec) -> Result<(), Error> {
        if !field.nullable {
            return Err(Error::MissingValue(format!("{}.{}", self.map.entity, field.name)));
        }
        for index in &field.blind_indexes {
            row.insert(index.column.clone(), Value::Null);
        }
        Ok(())
    }

    fn seal_plaintext(&self, row: &mut Row, field: &FieldSpec, plaintext: &Plaintext) -> Result<(), Error> {
        for index in &field.blind_indexes {
            let text = normalize(&plaintext.index_text(), index.case_insensitive);
            let context = index.context_for(&self.map.entity, &field.name);
            let digest = self.engine.blind_index(&text, &context, index.bits)?;
            row.insert(index.column.clone(), Value::String(digest));
        }

        let envelope = self.engine.encrypt(plaintext.as_bytes(), field.mode)?;
        row.insert(field.name.clone(), Value::String(envelope));
        Ok(())
    }
}

fn wrap(kind: FieldKind, bytes: Vec<u8>) -> Plaintext {
    match kind {
        FieldKind::Text => Plaintext::Text(bytes),
        FieldKind::Json => Plaintext::Structured(bytes),
    }
}
