//! Envelope format shared by both encryption modes.
//!
//! Binary layout:
//!
//! ```text
//! [kid_len:1][kid:kid_len][nonce:12][tag:16][ciphertext:*]
//! ```
//!
//! Persisted as `prefix || base64(blob)`. The prefix identifies the mode and
//! lets callers recognise envelopes without decoding them. An empty key id
//! (`kid_len = 0`) means "the current key" at decrypt time.
//!
//! The layout is a storage format: changing it breaks decryption of
//! previously written data.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::Error;

/// AES-GCM nonce size (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag size (128 bits).
pub const TAG_LEN: usize = 16;

/// Largest key id the single length byte can describe.
pub const MAX_KID_LEN: usize = u8::MAX as usize;

/// Smallest valid blob: length byte, nonce and tag.
pub const MIN_ENVELOPE_LEN: usize = 1 + NONCE_LEN + TAG_LEN;

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kid: Option<String>,
    nonce: [u8; NONCE_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope. An empty `kid` is stored as "no key id".
    #[must_use]
    pub fn new(
        kid: Option<String>,
        nonce: [u8; NONCE_LEN],
        tag: [u8; TAG_LEN],
        ciphertext: Vec<u8>,
    ) -> Self {
        Self { kid: kid.filter(|id| !id.is_empty()), nonce, tag, ciphertext }
    }

    /// Returns the embedded key id, if any.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Returns the nonce.
    #[must_use]
    pub const fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// Returns the ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Consumes the envelope, returning the ciphertext buffer.
    #[must_use]
    pub fn into_ciphertext(self) -> Vec<u8> {
        self.ciphertext
    }

    /// Serializes the envelope to its binary layout.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if the key id is longer than
    /// [`MAX_KID_LEN`] bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let kid = self.kid.as_deref().unwrap_or_default().as_bytes();
        let kid_len = u8::try_from(kid.len()).map_err(|_| {
            Error::InvalidArgument(format!(
                "key id too long: {} bytes (max: {MAX_KID_LEN})",
                kid.len()
            ))
        })?;

        let mut bytes = Vec::with_capacity(MIN_ENVELOPE_LEN + kid.len() + self.ciphertext.len());
        bytes.push(kid_len);
        bytes.extend_from_slice(kid);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.ciphertext);

        Ok(bytes)
    }

    /// Deserializes an envelope from its binary layout.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedEnvelope` if the blob is shorter than
    /// [`MIN_ENVELOPE_LEN`], if the declared key id length overruns the
    /// buffer, or if the key id is not UTF-8.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < MIN_ENVELOPE_LEN {
            return Err(Error::MalformedEnvelope(format!(
                "envelope too short: {} bytes (min: {MIN_ENVELOPE_LEN})",
                data.len()
            )));
        }

        let kid_len = usize::from(data[0]);
        let rest = &data[1..];
        if rest.len() < kid_len + NONCE_LEN + TAG_LEN {
            return Err(Error::MalformedEnvelope(format!(
                "declared key id length {kid_len} exceeds envelope"
            )));
        }

        let (kid, rest) = rest.split_at(kid_len);
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let kid = if kid.is_empty() {
            None
        } else {
            Some(
                std::str::from_utf8(kid)
                    .map_err(|_| Error::MalformedEnvelope("key id is not valid UTF-8".to_string()))?
                    .to_string(),
            )
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag);

        Ok(Self { kid, nonce: nonce_bytes, tag: tag_bytes, ciphertext: ciphertext.to_vec() })
    }
}

/// Encodes an envelope as `prefix || base64(blob)`.
///
/// # Errors
///
/// Returns an error if the envelope cannot be serialized.
pub fn armor(prefix: &str, envelope: &Envelope) -> Result<String, Error> {
    let blob = envelope.to_bytes()?;
    let mut out = String::with_capacity(prefix.len() + blob.len().div_ceil(3) * 4);
    out.push_str(prefix);
    STANDARD.encode_string(&blob, &mut out);
    Ok(out)
}

/// Decodes a `prefix || base64(blob)` string.
///
/// # Errors
///
/// - `Error::InvalidFormat` if `value` does not start with `prefix`
/// - `Error::InvalidEncoding` if the payload is not strict base64
/// - `Error::MalformedEnvelope` if the blob is not a valid envelope
pub fn unarmor(prefix: &str, value: &str) -> Result<Envelope, Error> {
    let payload = value.strip_prefix(prefix).ok_or(Error::InvalidFormat)?;
    let blob = STANDARD
        .decode(payload)
        .map_err(|e| Error::InvalidEncoding(format!("invalid base64 payload: {e}")))?;
    Envelope::from_bytes(&blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kid: Option<&str>) -> Envelope {
        Envelope::new(kid.map(str::to_string), [1; NONCE_LEN], [2; TAG_LEN], vec![3, 4, 5])
    }

    #[test]
    fn test_layout() {
        let bytes = sample(Some("k1")).to_bytes().unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..3], b"k1");
        assert_eq!(&bytes[3..15], &[1; NONCE_LEN]);
        assert_eq!(&bytes[15..31], &[2; TAG_LEN]);
        assert_eq!(&bytes[31..], &[3, 4, 5]);
    }

    #[test]
    fn test_parse_without_kid() {
        let bytes = sample(None).to_bytes().unwrap();
        assert_eq!(bytes[0], 0);
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.kid(), None);
        assert_eq!(parsed.ciphertext(), &[3, 4, 5]);
    }

    #[test]
    fn test_empty_kid_is_none() {
        assert_eq!(sample(Some("")).kid(), None);
    }

    #[test]
    fn test_minimum_envelope_has_empty_ciphertext() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&[9; NONCE_LEN + TAG_LEN]);
        let parsed = Envelope::from_bytes(&bytes).unwrap();
        assert!(parsed.ciphertext().is_empty());
        assert_eq!(parsed.tag(), &[9; TAG_LEN]);
    }

    #[test]
    fn test_too_short() {
        let result = Envelope::from_bytes(&[0; MIN_ENVELOPE_LEN - 1]);
        assert!(matches!(result, Err(Error::MalformedEnvelope(_))));
        assert!(matches!(Envelope::from_bytes(&[]), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_kid_len_overruns_buffer() {
        let mut bytes = vec![200u8];
        bytes.extend_from_slice(&[0; MIN_ENVELOPE_LEN + 10]);
        assert!(matches!(Envelope::from_bytes(&bytes), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_non_utf8_kid() {
        let mut bytes = vec![1u8, 0xff];
        bytes.extend_from_slice(&[0; NONCE_LEN + TAG_LEN]);
        assert!(matches!(Envelope::from_bytes(&bytes), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_kid_length_limit() {
        let max = "k".repeat(MAX_KID_LEN);
        let bytes = sample(Some(max.as_str())).to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap().kid(), Some(max.as_str()));

        let too_long = "k".repeat(MAX_KID_LEN + 1);
        assert!(matches!(sample(Some(too_long.as_str())).to_bytes(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_armor_and_unarmor() {
        let envelope = sample(Some("v1"));
        let armored = armor("ENC$1$", &envelope).unwrap();
        assert!(armored.starts_with("ENC$1$"));
        assert_eq!(unarmor("ENC$1$", &armored).unwrap(), envelope);
    }

    #[test]
    fn test_unarmor_errors_are_distinct() {
        assert!(matches!(unarmor("ENC$1$", "plain text"), Err(Error::InvalidFormat)));
        assert!(matches!(unarmor("ENC$1$", "ENC$1$not base64!"), Err(Error::InvalidEncoding(_))));
        assert!(matches!(unarmor("ENC$1$", "ENC$1$AAAA"), Err(Error::MalformedEnvelope(_))));
    }
}
