//! Error taxonomy for the session runtime.

use thiserror::Error;

use crate::binary::Node;
use crate::socket::{HandshakeError, SocketError};
use crate::store::StoreError;

/// Errors surfaced by client entry points.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("no push name stored, set one before sending presence")]
    NoPushName,
    #[error("noise handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("iq failed: {0}")]
    Iq(#[from] IqError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors produced by [`Client::send_iq`](crate::Client::send_iq).
#[derive(Debug, Error)]
pub enum IqError {
    /// The server answered with an error node. `code` and `text` come
    /// from the `error` child when present.
    #[error("server returned error {code}: {text}")]
    ServerError { code: u16, text: String, raw: Node },
    #[error("iq timed out")]
    Timeout,
    #[error("socket error while sending iq: {0}")]
    Socket(#[from] SocketError),
    #[error("disconnected before the reply arrived")]
    Disconnected,
    #[error("client is not connected")]
    NotConnected,
}
