//! The encrypted frame channel produced by a successful handshake.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::crypto::Cipher;

use super::frame::{FrameTransport, SocketError};

/// Wraps a frame transport with the transport ciphers. Frames passed to
/// [`send_frame`](Self::send_frame) are encrypted transparently; inbound
/// frames are decrypted by the read pump via
/// [`decrypt_frame`](Self::decrypt_frame).
pub struct NoiseSocket {
    transport: Arc<dyn FrameTransport>,
    // Counter-based ciphers: frame n must leave in encryption order, so
    // the lock is held across the send await.
    write_cipher: Mutex<Cipher>,
    read_cipher: std::sync::Mutex<Cipher>,
}

impl NoiseSocket {
    pub fn new(transport: Arc<dyn FrameTransport>, write: Cipher, read: Cipher) -> Self {
        Self {
            transport,
            write_cipher: Mutex::new(write),
            read_cipher: std::sync::Mutex::new(read),
        }
    }

    /// Encrypts and sends one plaintext frame.
    pub async fn send_frame(&self, plaintext: &[u8]) -> Result<(), SocketError> {
        let mut cipher = self.write_cipher.lock().await;
        let ciphertext = cipher
            .encrypt(plaintext, &[])
            .map_err(|_| SocketError::Crypto)?;
        self.transport.send_frame(Bytes::from(ciphertext)).await
    }

    /// Decrypts one inbound frame. Only called from the read pump, in
    /// arrival order.
    pub fn decrypt_frame(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SocketError> {
        self.read_cipher
            .lock()
            .unwrap()
            .decrypt(ciphertext, &[])
            .map_err(|_| SocketError::Crypto)
    }

    pub async fn stop(&self, graceful: bool) {
        self.transport.stop(graceful).await;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn context(&self) -> CancellationToken {
        self.transport.context()
    }

    pub fn stopped_locally(&self) -> bool {
        self.transport.stopped_locally()
    }
}
