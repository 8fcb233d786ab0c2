//! Cryptographic utilities for device credential encryption.
//!
//! Device passwords are stored encrypted with AES-256-GCM and only
//! decrypted immediately before a vendor adapter needs them. The
//! encryption key is derived from a master secret using PBKDF2.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use sha2::Sha256;
use std::env;
use tracing::warn;

use base64::Engine;

const ENCRYPTION_KEY_ENV: &str = "WARDEN_ENCRYPTION_KEY";
const DEFAULT_ITERATIONS: u32 = 100_000;

/// Error type for cryptographic operations.
#[derive(Debug, Clone, PartialEq)]
pub enum CryptoError {
    EncryptionFailed,
    DecryptionFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::EncryptionFailed => write!(f, "Failed to encrypt data"),
            CryptoError::DecryptionFailed => write!(f, "Failed to decrypt data"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<CryptoError> for crate::Error {
    fn from(e: CryptoError) -> Self {
        crate::Error::Crypto(e.to_string())
    }
}

/// Encrypts and decrypts device credentials.
#[derive(Clone)]
pub struct CryptoService {
    cipher: Aes256Gcm,
}

impl CryptoService {
    /// Create a new CryptoService with a master key.
    ///
    /// Keys shorter than 32 bytes are stretched with PBKDF2.
    pub fn new(master_key: &[u8]) -> Self {
        let key = Self::derive_key(master_key);
        let cipher = Aes256Gcm::new(&key.into());
        Self { cipher }
    }

    /// Create a CryptoService from the `WARDEN_ENCRYPTION_KEY` environment
    /// variable, generating a random key when unset.
    ///
    /// A random key means stored credentials become unreadable after a
    /// restart, so production deployments must set the variable.
    pub fn from_env_or_generate() -> Self {
        if let Ok(key_str) = env::var(ENCRYPTION_KEY_ENV) {
            Self::new(key_str.as_bytes())
        } else {
            warn!(
                category = "crypto",
                "No {} set, using random key (stored credentials will be invalid on restart)",
                ENCRYPTION_KEY_ENV
            );
            Self::generate_random()
        }
    }

    /// Generate a random encryption key.
    pub fn generate_random() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let cipher = Aes256Gcm::new(&key);
        Self { cipher }
    }

    /// Derive a 256-bit key from the input using PBKDF2.
    fn derive_key(input: &[u8]) -> [u8; 32] {
        if input.len() >= 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&input[..32]);
            return key;
        }

        let salt = b"Warden-Credential-Salt-v1";
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(input, salt, DEFAULT_ITERATIONS, &mut key);
        key
    }

    /// Encrypt data using AES-256-GCM.
    ///
    /// Returns a base64-encoded string containing the nonce and ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        self.cipher
            .encrypt(&nonce, plaintext)
            .map(|ciphertext| {
                let mut combined = nonce.to_vec();
                combined.extend_from_slice(&ciphertext);
                base64::engine::general_purpose::STANDARD.encode(combined)
            })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Encrypt a string.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt data that was encrypted with `encrypt`.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        // 12-byte GCM nonce precedes the ciphertext
        if combined.len() < 12 {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Decrypt to a string.
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        String::from_utf8(self.decrypt(encoded)?).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::from_env_or_generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = CryptoService::new(b"this_is_a_32_byte_master_key_for_testing");
        let plaintext = "admin-password-123";

        let encrypted = crypto.encrypt_str(plaintext).unwrap();
        let decrypted = crypto.decrypt_str(&encrypted).unwrap();

        assert_eq!(plaintext, decrypted);
        assert_ne!(plaintext, encrypted);
    }

    #[test]
    fn test_short_key_derivation() {
        let crypto = CryptoService::new(b"short");
        let encrypted = crypto.encrypt_str("secret").unwrap();
        assert_eq!(crypto.decrypt_str(&encrypted).unwrap(), "secret");
    }

    #[test]
    fn test_wrong_key_fails() {
        let crypto1 = CryptoService::new(b"this_is_a_32_byte_master_key_for_testing");
        let crypto2 = CryptoService::new(b"a_different_32_byte_master_key_for_tests");

        let encrypted = crypto1.encrypt_str("secret").unwrap();
        assert!(crypto2.decrypt_str(&encrypted).is_err());
    }

    #[test]
    fn test_invalid_ciphertext_fails() {
        let crypto = CryptoService::new(b"this_is_a_32_byte_master_key_for_testing");
        assert!(crypto.decrypt_str("not_valid_base64!!").is_err());
        assert!(crypto.decrypt_str("c2hvcnQ=").is_err());
    }
}
