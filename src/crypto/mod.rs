//! Cryptographic primitives backing the Noise handshake and the
//! encrypted frame channel.

mod cipher;
mod hkdf;
mod keypair;
mod noise;

pub use cipher::{Cipher, CipherError};
pub use hkdf::{derive_key_pair, Hkdf};
pub use keypair::{KeyPair, PreKey};
pub use noise::{NoiseState, NOISE_PATTERN};
