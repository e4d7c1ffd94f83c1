//! The stored form of a sealed document.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::DecryptionFailure;

/// Length of the GCM initialization vector in bytes.
pub const IV_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Sealed payload: ciphertext, IV and authentication tag, each base64-encoded
/// for storage.
///
/// Produced once per plaintext blob and never mutated. Stored by the
/// [`MetadataStore`](crate::MetadataStore) under the blob's storage id,
/// separately from wherever the plaintext originally lived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    ciphertext: String,
    iv: String,
    auth_tag: String,
}

impl EncryptedPayload {
    /// Build a payload from raw cipher output.
    pub fn from_parts(ciphertext: &[u8], iv: &[u8; IV_LEN], auth_tag: &[u8; TAG_LEN]) -> Self {
        Self {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(auth_tag),
        }
    }

    pub fn ciphertext_b64(&self) -> &str {
        &self.ciphertext
    }

    pub fn iv_b64(&self) -> &str {
        &self.iv
    }

    pub fn auth_tag_b64(&self) -> &str {
        &self.auth_tag
    }

    /// Decode the three stored fields back into raw bytes.
    pub fn decode_parts(&self) -> Result<DecodedPayload, DecryptionFailure> {
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;

        let iv: [u8; IV_LEN] = decode_field("iv", &self.iv)?.try_into().map_err(|v: Vec<u8>| {
            DecryptionFailure::Malformed {
                field: "iv",
                reason: format!("expected {IV_LEN} bytes, got {}", v.len()),
            }
        })?;

        let auth_tag: [u8; TAG_LEN] =
            decode_field("auth_tag", &self.auth_tag)?
                .try_into()
                .map_err(|v: Vec<u8>| DecryptionFailure::Malformed {
                    field: "auth_tag",
                    reason: format!("expected {TAG_LEN} bytes, got {}", v.len()),
                })?;

        Ok(DecodedPayload {
            ciphertext,
            iv,
            auth_tag,
        })
    }

    /// Raw-byte constructor for tests that need to corrupt individual fields.
    #[cfg(test)]
    pub(crate) fn from_raw(ciphertext: &[u8], iv: &[u8], auth_tag: &[u8]) -> Self {
        Self {
            ciphertext: STANDARD.encode(ciphertext),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(auth_tag),
        }
    }
}

/// Raw bytes of an [`EncryptedPayload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; TAG_LEN],
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, DecryptionFailure> {
    STANDARD
        .decode(value)
        .map_err(|e| DecryptionFailure::Malformed {
            field,
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_base64() {
        let payload = EncryptedPayload::from_parts(b"abc", &[1u8; IV_LEN], &[2u8; TAG_LEN]);
        assert_eq!(payload.ciphertext_b64(), "YWJj");
        assert_eq!(payload.iv_b64().len(), 16);
        assert_eq!(payload.auth_tag_b64().len(), 24);
    }

    #[test]
    fn test_decode_parts() {
        let payload = EncryptedPayload::from_parts(b"abc", &[1u8; IV_LEN], &[2u8; TAG_LEN]);
        let decoded = payload.decode_parts().expect("well-formed payload");
        assert_eq!(decoded.ciphertext, b"abc");
        assert_eq!(decoded.iv, [1u8; IV_LEN]);
        assert_eq!(decoded.auth_tag, [2u8; TAG_LEN]);
    }

    #[test]
    fn test_decode_rejects_short_iv() {
        let payload = EncryptedPayload::from_raw(b"abc", &[1u8; 8], &[2u8; TAG_LEN]);
        let err = payload.decode_parts().expect_err("short iv must fail");
        assert!(matches!(err, DecryptionFailure::Malformed { field: "iv", .. }));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let mut payload = EncryptedPayload::from_parts(b"abc", &[1u8; IV_LEN], &[2u8; TAG_LEN]);
        payload.auth_tag = "!!not base64!!".to_string();
        let err = payload.decode_parts().expect_err("garbage tag must fail");
        assert!(matches!(
            err,
            DecryptionFailure::Malformed {
                field: "auth_tag",
                ..
            }
        ));
    }

    #[test]
    fn test_serde_shape() {
        let payload = EncryptedPayload::from_parts(b"abc", &[1u8; IV_LEN], &[2u8; TAG_LEN]);
        let json = serde_json::to_value(&payload).expect("serialize");
        assert!(json.get("ciphertext").is_some());
        assert!(json.get("iv").is_some());
        assert!(json.get("auth_tag").is_some());

        let back: EncryptedPayload = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, payload);
    }
}
