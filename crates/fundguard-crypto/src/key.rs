//! Vault key material and key providers.
//!
//! The vault never reads the environment itself. It asks an injected
//! [`KeyProvider`] for the current key, so tests can pin a deterministic key
//! and production can swap in a managed secret store.

use std::fmt::Debug;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// 256-bit vault key.
///
/// Key material is securely zeroed from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Create a key from raw bytes known to be valid, such as a literal.
    ///
    /// # Panics
    /// Panics on an all-zero key. Use [`EncryptionKey::try_from_bytes`] for
    /// bytes that come from outside the program.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        assert_ne!(bytes, [0u8; KEY_LEN], "vault key is all zeros (degenerate)");
        Self { key: bytes }
    }

    /// Create a key from raw bytes, refusing the all-zero key.
    pub fn try_from_bytes(mut bytes: [u8; KEY_LEN]) -> Result<Self, CryptoError> {
        if bytes == [0u8; KEY_LEN] {
            return Err(CryptoError::KeyUnavailable("key is all zeros".to_string()));
        }
        let key = Self { key: bytes };
        bytes.zeroize();
        Ok(key)
    }

    /// Generate a fresh key from system randomness.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Parse a key from its text form: 64 hex characters or standard base64
    /// of exactly 32 bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let trimmed = encoded.trim();

        let mut bytes = if trimmed.len() == KEY_LEN * 2 {
            hex::decode(trimmed)
                .map_err(|e| CryptoError::KeyUnavailable(format!("invalid hex key: {e}")))?
        } else {
            STANDARD
                .decode(trimmed)
                .map_err(|e| CryptoError::KeyUnavailable(format!("invalid base64 key: {e}")))?
        };

        if bytes.len() != KEY_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::KeyUnavailable(format!(
                "key must be {KEY_LEN} bytes, got {len}"
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        bytes.zeroize();

        Self::try_from_bytes(key)
    }

    /// Get key bytes (sensitive operation)
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Source of the process-wide vault key.
pub trait KeyProvider: Send + Sync + Debug {
    fn current_key(&self) -> Result<EncryptionKey, CryptoError>;
}

/// Provider holding a fixed key. Used by tests and by deployments that load
/// the key from a secret manager before constructing the vault.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    key: EncryptionKey,
}

impl StaticKeyProvider {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_key(&self) -> Result<EncryptionKey, CryptoError> {
        Ok(self.key.clone())
    }
}

/// Provider resolving the key once from an environment variable.
///
/// When the variable is missing and `allow_ephemeral` is set, a random key is
/// generated for the lifetime of the process. Anything sealed under that key
/// becomes unreadable after a restart, so the fallback is logged loudly.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    key: EncryptionKey,
    ephemeral: bool,
}

impl EnvKeyProvider {
    /// Read `var_name` from the process environment.
    pub fn from_env(var_name: &str, allow_ephemeral: bool) -> Result<Self, CryptoError> {
        let value = std::env::var(var_name).ok();
        Self::resolve(var_name, value.as_deref(), allow_ephemeral)
    }

    /// Resolve a key from an already-read variable value.
    pub fn resolve(
        var_name: &str,
        value: Option<&str>,
        allow_ephemeral: bool,
    ) -> Result<Self, CryptoError> {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(encoded) => Ok(Self {
                key: EncryptionKey::from_encoded(encoded)?,
                ephemeral: false,
            }),
            None if allow_ephemeral => {
                tracing::warn!(
                    var = var_name,
                    "vault key not configured; generated an ephemeral key, documents \
                     sealed by this process cannot be opened after restart"
                );
                Ok(Self {
                    key: EncryptionKey::generate(),
                    ephemeral: true,
                })
            }
            None => Err(CryptoError::KeyUnavailable(format!(
                "environment variable {var_name} is not set"
            ))),
        }
    }

    /// True when the key was generated in-process rather than configured.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }
}

impl KeyProvider for EnvKeyProvider {
    fn current_key(&self) -> Result<EncryptionKey, CryptoError> {
        Ok(self.key.clone())
    }
}
