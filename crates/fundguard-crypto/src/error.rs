//! Vault error types

use std::path::PathBuf;
use thiserror::Error;

/// Fatal failure while sealing a payload. Never retried.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Cipher fault: {0}")]
    Cipher(String),

    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),
}

/// A payload could not be opened.
///
/// No variant ever carries partial plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionFailure {
    #[error("Authentication failed: ciphertext or tag tampered, or wrong key")]
    Authentication,

    #[error("Malformed payload field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid blob id: {0:?}")]
    InvalidBlobId(String),

    #[error("Failed to access metadata at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
