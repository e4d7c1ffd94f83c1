//! Document vault cryptography for Fundguard.
//!
//! Sensitive identity documents are sealed with AES-256-GCM before they rest
//! anywhere the normal read path can reach. This crate owns the primitive and
//! nothing else: it never persists documents and never raises incidents.
//!
//! # Components
//!
//! - [`KeyProvider`]: injected source of the 256-bit vault key
//! - [`CryptoVault`]: `encrypt` / `decrypt` over arbitrary byte payloads
//! - [`EncryptedPayload`]: the stored `{ciphertext, iv, auth_tag}` triple
//! - [`MetadataStore`]: keyed store for payloads, addressed by blob id
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use fundguard_crypto::{CryptoVault, EncryptionKey, StaticKeyProvider};
//!
//! let keys = StaticKeyProvider::new(EncryptionKey::from_bytes([7u8; 32]));
//! let vault = CryptoVault::new(Arc::new(keys));
//!
//! let payload = vault.encrypt(b"passport scan").expect("encrypt");
//! let plaintext = vault.decrypt(&payload).expect("decrypt");
//! assert_eq!(plaintext, b"passport scan");
//! ```

mod error;
pub mod key;
pub mod metadata;
pub mod payload;
pub mod vault;

pub use error::{CryptoError, DecryptionFailure, StoreError};
pub use key::{EncryptionKey, EnvKeyProvider, KeyProvider, StaticKeyProvider};
pub use metadata::{ExpiringMetadataStore, FileMetadataStore, InMemoryMetadataStore, MetadataStore};
pub use payload::EncryptedPayload;
pub use vault::CryptoVault;
