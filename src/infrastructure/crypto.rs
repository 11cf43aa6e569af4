use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("sealing failed: {0}")]
    SealFailed(String),
    #[error("opening failed: {0}")]
    OpenFailed(String),
    #[error("invalid key length")]
    InvalidKeyLength,
}

/// Seals durable auth tokens before they reach the store. The sealed blob is
/// a random 12-byte nonce followed by the AES-256-GCM ciphertext.
pub struct TokenSealer {
    cipher: Aes256Gcm,
}

impl TokenSealer {
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKeyLength)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKeyLength);
        }

        if key_bytes.iter().all(|&b| b == key_bytes[0]) {
            warn!("sealing key has uniform bytes; generate a random 32-byte key");
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| EncryptionError::SealFailed(e.to_string()))?;

        Ok(Self { cipher })
    }

    pub fn seal(&self, plaintext: &str) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::SealFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(12 + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<String, EncryptionError> {
        if sealed.len() < 12 {
            return Err(EncryptionError::OpenFailed("blob too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| EncryptionError::OpenFailed(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| EncryptionError::OpenFailed(e.to_string()))
    }
}

/// Stable fingerprint for credentials that must never appear in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(token.as_bytes()));
    format!("sha256:{}", &digest[..16])
}
