//! Field-level AES-256-GCM encryption for contact fields (phone, email,
//! push tokens) so that §3's "contact fields are never stored in cleartext"
//! invariant holds both at rest and in any log line.
//!
//! One cipher instance is constructed from a base64-encoded 32-byte key and
//! reused to encrypt/decrypt individual field values, unlike a whole-file
//! secrets blob: each call produces its own random 12-byte nonce.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use nb_common::types::EncryptedField;
use rand::RngCore;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
}

pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// `encryption_key` is a base64-encoded 32-byte AES-256 key, as required
    /// by configuration (`field-encryption key`).
    pub fn new(encryption_key: &str) -> Result<Self, CryptoError> {
        let key_bytes = BASE64
            .decode(encryption_key)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid base64 key: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedField, CryptoError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        Ok(EncryptedField { ciphertext, nonce: nonce_bytes })
    }

    pub fn decrypt(&self, field: &EncryptedField) -> Result<String, CryptoError> {
        let nonce = Nonce::from_slice(&field.nonce);
        let plaintext = self
            .cipher
            .decrypt(nonce, field.ciphertext.as_slice())
            .map_err(|e| CryptoError::DecryptFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::DecryptFailed(e.to_string()))
    }
}

/// Generates a new base64-encoded 32-byte AES-256 key, for operators
/// provisioning the `field-encryption key` configuration option.
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    BASE64.encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_field() {
        let cipher = FieldCipher::new(&generate_key()).unwrap();
        let encrypted = cipher.encrypt("+14155550100").unwrap();
        assert_ne!(encrypted.ciphertext, b"+14155550100");
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "+14155550100");
    }

    #[test]
    fn rejects_short_keys() {
        let bad_key = BASE64.encode([0u8; 16]);
        assert!(FieldCipher::new(&bad_key).is_err());
    }

    #[test]
    fn two_encryptions_of_same_value_differ() {
        let cipher = FieldCipher::new(&generate_key()).unwrap();
        let a = cipher.encrypt("same@example.com").unwrap();
        let b = cipher.encrypt("same@example.com").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
