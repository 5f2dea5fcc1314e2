//! Symmetric state for the `Noise_XX_25519_AESGCM_SHA256` handshake.
//!
//! Both halves of the key exchange drive the same primitive operations:
//! absorb public data into the transcript hash, mix DH outputs into the
//! chaining key, and encrypt/decrypt with the transcript as AAD. The
//! initiator-side message schedule lives in [`crate::socket::handshake`].

use sha2::{Digest, Sha256};

use super::cipher::CipherError;
use super::hkdf::derive_key_pair;
use super::Cipher;

/// Noise protocol pattern, padded to exactly 32 bytes.
pub const NOISE_PATTERN: &[u8; 32] = b"Noise_XX_25519_AESGCM_SHA256\x00\x00\x00\x00";

pub struct NoiseState {
    hash: [u8; 32],
    salt: [u8; 32],
    key: [u8; 32],
    counter: u32,
}

impl NoiseState {
    /// Starts a handshake transcript, absorbing the connection header
    /// as the prologue.
    pub fn new(header: &[u8]) -> Self {
        let hash = *NOISE_PATTERN;
        let mut state = Self {
            hash,
            salt: hash,
            key: hash,
            counter: 0,
        };
        state.authenticate(header);
        state
    }

    /// Mixes public data into the transcript hash.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn iv(&self) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[8..12].copy_from_slice(&self.counter.to_be_bytes());
        iv
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        use aes_gcm::aead::{Aead, Payload};
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        let iv = self.iv();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: &self.hash })
            .map_err(|_| CipherError::EncryptionFailed)?;
        self.counter += 1;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        use aes_gcm::aead::{Aead, Payload};
        use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        let iv = self.iv();
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), Payload { msg: ciphertext, aad: &self.hash })
            .map_err(|_| CipherError::DecryptionFailed)?;
        self.counter += 1;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    /// Mixes a DH shared secret into the chaining key, rotating the
    /// cipher key and resetting the nonce counter.
    pub fn mix_into_key(&mut self, shared_secret: &[u8]) {
        self.counter = 0;
        let (salt, key) = derive_key_pair(&self.salt, shared_secret);
        self.salt = salt;
        self.key = key;
    }

    /// DH between a local private key and a remote public key, mixed
    /// into the chaining key.
    pub fn mix_shared_secret(&mut self, private: &[u8; 32], public: &[u8; 32]) {
        let shared = x25519_dalek::x25519(*private, *public);
        self.mix_into_key(&shared);
    }

    /// Derives the transport ciphers once the message schedule is done.
    /// Returns `(write, read)` from the initiator's point of view; the
    /// responder uses the same pair swapped.
    pub fn finish(self) -> (Cipher, Cipher) {
        let (write_key, read_key) = derive_key_pair(&self.salt, &[]);
        (Cipher::new(write_key), Cipher::new(read_key))
    }
}
