//! Curve25519 key pairs.

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// A Curve25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    pub public: [u8; 32],
    pub private: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let mut private = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private);
        // Curve25519 clamping
        private[0] &= 248;
        private[31] &= 127;
        private[31] |= 64;
        Self::from_private_key(private)
    }

    pub fn from_private_key(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret);
        Self {
            public: *public.as_bytes(),
            private,
        }
    }

    /// X25519 Diffie-Hellman agreement with a remote public key.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private);
        let shared = secret.diffie_hellman(&PublicKey::from(*their_public));
        *shared.as_bytes()
    }

    /// Signs another key pair's public key, prefixed with the DJB key
    /// type byte, as required for signed prekeys.
    pub fn sign(&self, key_to_sign: &KeyPair) -> [u8; 64] {
        use ed25519_dalek::{Signer, SigningKey};

        let mut message = [0u8; 33];
        message[0] = 0x05;
        message[1..].copy_from_slice(&key_to_sign.public);

        let signing_key = SigningKey::from_bytes(&self.private);
        signing_key.sign(&message).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .field("private", &"[redacted]")
            .finish()
    }
}

/// A one-time or signed prekey.
#[derive(Debug, Clone)]
pub struct PreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
    pub signature: Option<[u8; 64]>,
}

impl PreKey {
    pub fn new(key_id: u32) -> Self {
        Self {
            key_pair: KeyPair::generate(),
            key_id,
            signature: None,
        }
    }

    pub fn new_signed(key_id: u32, identity_key: &KeyPair) -> Self {
        let mut pre_key = Self::new(key_id);
        pre_key.signature = Some(identity_key.sign(&pre_key.key_pair));
        pre_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_agreement_is_symmetric() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(alice.dh(&bob.public), bob.dh(&alice.public));
    }

    #[test]
    fn signed_prekey_carries_signature() {
        let identity = KeyPair::generate();
        let prekey = PreKey::new_signed(7, &identity);
        assert_eq!(prekey.key_id, 7);
        assert!(prekey.signature.is_some());
    }

    #[test]
    fn debug_hides_private_key() {
        let kp = KeyPair::generate();
        let rendered = format!("{kp:?}");
        assert!(!rendered.contains(&hex::encode(kp.private)));
    }
}
