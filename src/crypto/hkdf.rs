//! HKDF-SHA256 key derivation.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct Hkdf {
    prk: [u8; 32],
}

impl Hkdf {
    /// HKDF-Extract.
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let salt = salt.unwrap_or(&[0u8; 32]);
        let mut mac = HmacSha256::new_from_slice(salt).expect("hmac accepts any key size");
        mac.update(ikm);
        Self {
            prk: mac.finalize().into_bytes().into(),
        }
    }

    /// HKDF-Expand to `length` bytes.
    pub fn expand(&self, info: &[u8], length: usize) -> Vec<u8> {
        let mut output = Vec::with_capacity(length);
        let mut block: Vec<u8> = Vec::new();
        let mut counter = 1u8;
        while output.len() < length {
            let mut mac =
                HmacSha256::new_from_slice(&self.prk).expect("hmac accepts any key size");
            mac.update(&block);
            mac.update(info);
            mac.update(&[counter]);
            block = mac.finalize().into_bytes().to_vec();
            let take = (length - output.len()).min(block.len());
            output.extend_from_slice(&block[..take]);
            counter += 1;
        }
        output
    }

    /// Extract-then-expand in one call.
    pub fn derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], length: usize) -> Vec<u8> {
        Self::new(salt, ikm).expand(info, length)
    }
}

/// Splits a chaining value into two 32-byte keys.
pub fn derive_key_pair(salt: &[u8], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let derived = Hkdf::derive(Some(salt), ikm, b"", 64);
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&derived[0..32]);
    second.copy_from_slice(&derived[32..64]);
    (first, second)
}
