//! AES-256-GCM with a counter-derived IV.
//!
//! Each direction of the encrypted channel owns one `Cipher`; the
//! 32-bit counter occupies the last four IV bytes and advances on every
//! operation, so both ends stay in sync as long as no frame is lost.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CipherError {
    #[error("invalid key")]
    InvalidKey,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
}

pub struct Cipher {
    cipher: Aes256Gcm,
    counter: u32,
}

impl Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
            counter: 0,
        }
    }

    fn next_iv(&mut self) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[8..12].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.wrapping_add(1);
        iv
    }

    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let iv = self.next_iv();
        self.cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad })
            .map_err(|_| CipherError::EncryptionFailed)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let iv = self.next_iv();
        self.cipher
            .decrypt(Nonce::from_slice(&iv), Payload { msg: ciphertext, aad })
            .map_err(|_| CipherError::DecryptionFailed)
    }
}
