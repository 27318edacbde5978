//! AES-256-GCM sealing of stored blobs
//!
//! Blob format:
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::error::{AppError, Result};

pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Authenticated encryption with a single configured key
#[derive(Clone)]
pub struct EncryptionEngine {
    cipher: Aes256Gcm,
}

impl EncryptionEngine {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Seal `plaintext` under a fresh nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AppError::Integrity("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a blob produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AppError::Integrity(format!(
                "encrypted blob too short: {} bytes (minimum {})",
                blob.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                AppError::Integrity(
                    "decryption failed: wrong key or tampered data".to_string(),
                )
            })
    }
}
