//! AES-256-GCM document vault.
//!
//! Every call to [`CryptoVault::encrypt`] draws a fresh 96-bit IV from the OS
//! random source. Unlike log-position nonces there is no counter to persist,
//! and the birthday bound for random 96-bit IVs is far beyond the number of
//! identity documents a platform will ever seal under one key.
//!
//! The vault is side-effect free: it does not log payload contents and does
//! not raise incidents. Callers that see a [`DecryptionFailure`] decide
//! whether it is an `encryption_failure` incident.

use std::sync::Arc;

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;

use crate::key::KeyProvider;
use crate::payload::{EncryptedPayload, IV_LEN, TAG_LEN};
use crate::{CryptoError, DecryptionFailure};

/// Authenticated encryption over arbitrary byte payloads.
#[derive(Debug, Clone)]
pub struct CryptoVault {
    keys: Arc<dyn KeyProvider>,
}

impl CryptoVault {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    /// Seal `plaintext` under the current key with a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload, CryptoError> {
        let key = self.keys.current_key()?;

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| CryptoError::Cipher(e.to_string()))?;

        let split = sealed
            .len()
            .checked_sub(TAG_LEN)
            .ok_or_else(|| CryptoError::Cipher("cipher output shorter than tag".to_string()))?;
        let tag_bytes = sealed.split_off(split);

        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&tag_bytes);

        Ok(EncryptedPayload::from_parts(&sealed, &iv, &auth_tag))
    }

    /// Open a sealed payload.
    ///
    /// Returns [`DecryptionFailure::Authentication`] if the ciphertext or tag
    /// was modified or the key differs. Never returns partial plaintext.
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Vec<u8>, DecryptionFailure> {
        let decoded = payload.decode_parts()?;

        let key = self
            .keys
            .current_key()
            .map_err(|e| DecryptionFailure::KeyUnavailable(e.to_string()))?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| DecryptionFailure::KeyUnavailable(e.to_string()))?;

        let mut sealed = decoded.ciphertext;
        sealed.extend_from_slice(&decoded.auth_tag);

        cipher
            .decrypt(Nonce::from_slice(&decoded.iv), sealed.as_slice())
            .map_err(|_| DecryptionFailure::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{EncryptionKey, StaticKeyProvider};
    use proptest::prelude::*;

    fn vault_with(byte: u8) -> CryptoVault {
        CryptoVault::new(Arc::new(StaticKeyProvider::new(EncryptionKey::from_bytes(
            [byte; 32],
        ))))
    }

    fn flip_bit(bytes: &mut [u8], bit: usize) {
        let idx = bit / 8 % bytes.len();
        bytes[idx] ^= 1 << (bit % 8);
    }

    #[test]
    fn test_roundtrip() {
        let vault = vault_with(0x42);
        let payload = vault.encrypt(b"passport scan").expect("encryption should succeed");
        let plaintext = vault.decrypt(&payload).expect("decryption should succeed");
        assert_eq!(plaintext, b"passport scan");
    }

    #[test]
    fn test_empty_plaintext() {
        let vault = vault_with(0x42);
        let payload = vault.encrypt(b"").expect("encryption should succeed");
        let decoded = payload.decode_parts().expect("decode");
        assert!(decoded.ciphertext.is_empty());

        let plaintext = vault.decrypt(&payload).expect("decryption should succeed");
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = vault_with(0x42).encrypt(b"secret").expect("encrypt");
        let result = vault_with(0x43).decrypt(&payload);
        assert_eq!(result, Err(DecryptionFailure::Authentication));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = vault_with(0x42);
        let payload = vault.encrypt(b"bank statement").expect("encrypt");
        let mut decoded = payload.decode_parts().expect("decode");
        decoded.ciphertext[0] ^= 0x01;

        let tampered = EncryptedPayload::from_parts(&decoded.ciphertext, &decoded.iv, &decoded.auth_tag);
        assert_eq!(vault.decrypt(&tampered), Err(DecryptionFailure::Authentication));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let vault = vault_with(0x42);
        let payload = vault.encrypt(b"bank statement").expect("encrypt");
        let mut decoded = payload.decode_parts().expect("decode");
        decoded.auth_tag[15] ^= 0x80;

        let tampered = EncryptedPayload::from_parts(&decoded.ciphertext, &decoded.iv, &decoded.auth_tag);
        assert_eq!(vault.decrypt(&tampered), Err(DecryptionFailure::Authentication));
    }

    #[test]
    fn test_truncated_tag_is_malformed() {
        let vault = vault_with(0x42);
        let payload = vault.encrypt(b"x").expect("encrypt");
        let decoded = payload.decode_parts().expect("decode");
        let broken = EncryptedPayload::from_raw(&decoded.ciphertext, &decoded.iv, &decoded.auth_tag[..8]);

        assert!(matches!(
            vault.decrypt(&broken),
            Err(DecryptionFailure::Malformed {
                field: "auth_tag",
                ..
            })
        ));
    }

    #[test]
    fn test_iv_is_fresh_per_call() {
        let vault = vault_with(0x42);
        let a = vault.encrypt(b"same bytes").expect("encrypt");
        let b = vault.encrypt(b"same bytes").expect("encrypt");
        assert_ne!(a.iv_b64(), b.iv_b64());
        assert_ne!(a.ciphertext_b64(), b.ciphertext_b64());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..4096)) {
            let vault = vault_with(0x5A);
            let payload = vault.encrypt(&plaintext).expect("encrypt");
            prop_assert_eq!(vault.decrypt(&payload).expect("decrypt"), plaintext);
        }

        #[test]
        fn prop_ciphertext_bit_flip_detected(
            plaintext in prop::collection::vec(any::<u8>(), 1..512),
            bit in any::<usize>(),
        ) {
            let vault = vault_with(0x5A);
            let payload = vault.encrypt(&plaintext).expect("encrypt");
            let mut decoded = payload.decode_parts().expect("decode");
            flip_bit(&mut decoded.ciphertext, bit);

            let tampered = EncryptedPayload::from_parts(&decoded.ciphertext, &decoded.iv, &decoded.auth_tag);
            prop_assert_eq!(vault.decrypt(&tampered), Err(DecryptionFailure::Authentication));
        }

        #[test]
        fn prop_tag_bit_flip_detected(
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            bit in 0usize..(TAG_LEN * 8),
        ) {
            let vault = vault_with(0x5A);
            let payload = vault.encrypt(&plaintext).expect("encrypt");
            let mut decoded = payload.decode_parts().expect("decode");
            flip_bit(&mut decoded.auth_tag, bit);

            let tampered = EncryptedPayload::from_parts(&decoded.ciphertext, &decoded.iv, &decoded.auth_tag);
            prop_assert_eq!(vault.decrypt(&tampered), Err(DecryptionFailure::Authentication));
        }

        #[test]
        fn prop_iv_unique(plaintext in prop::collection::vec(any::<u8>(), 0..64)) {
            let vault = vault_with(0x5A);
            let a = vault.encrypt(&plaintext).expect("encrypt");
            let b = vault.encrypt(&plaintext).expect("encrypt");
            prop_assert_ne!(a.iv_b64(), b.iv_b64());
        }
    }
}
