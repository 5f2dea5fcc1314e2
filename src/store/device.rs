//! Device identity: the key material and pairing state that survives
//! across connections.

use rand::RngCore;

use crate::crypto::{KeyPair, PreKey};
use crate::types::JID;

/// Identity of this companion device. The key material always exists;
/// a present `id` is what marks the device as paired.
#[derive(Debug, Clone)]
pub struct Device {
    /// Noise static key used for the transport handshake.
    pub noise_key: KeyPair,
    /// Signal identity key.
    pub identity_key: KeyPair,
    /// Signed prekey, signed by the identity key.
    pub signed_pre_key: PreKey,
    pub registration_id: u32,
    /// Secret mixed into pairing QR payloads.
    pub adv_secret_key: [u8; 32],

    /// The JID assigned by the server at pair time. `None` until the
    /// first successful pairing.
    pub id: Option<JID>,
    pub push_name: String,
    pub platform: String,
    pub business_name: String,
}

impl Device {
    /// Creates an unpaired device with fresh key material.
    pub fn generate() -> Self {
        let identity_key = KeyPair::generate();
        let signed_pre_key = PreKey::new_signed(1, &identity_key);
        let mut adv_secret_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut adv_secret_key);

        Self {
            noise_key: KeyPair::generate(),
            identity_key,
            signed_pre_key,
            // 14-bit registration id, matching the mobile clients
            registration_id: rand::random::<u32>() & 0x3FFF,
            adv_secret_key,
            id: None,
            push_name: String::new(),
            platform: String::new(),
            business_name: String::new(),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.id.is_some()
    }
}
