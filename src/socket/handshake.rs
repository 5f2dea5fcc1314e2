//! Initiator side of the `Noise_XX` handshake (§ key exchange).
//!
//! Two round trips upgrade a fresh frame transport into a
//! [`NoiseSocket`]. An unpaired device sends a registration payload in
//! the final message so the server starts the pairing exchange after
//! authentication.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::crypto::{CipherError, KeyPair, NoiseState};
use crate::proto::{self, ClientFinish, ClientHello, HandshakeMessage};
use crate::store::Device;

use super::frame::{FrameTransport, SocketError, WA_CONN_HEADER};
use super::noise::NoiseSocket;

const HANDSHAKE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("timed out waiting for server hello")]
    Timeout,
    #[error("transport closed during handshake")]
    Closed,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CipherError),
    #[error("malformed server response: {0}")]
    InvalidResponse(String),
}

pub(crate) async fn do_handshake(
    device: &Device,
    transport: &Arc<dyn FrameTransport>,
    frames: &mut mpsc::Receiver<Bytes>,
) -> Result<NoiseSocket, HandshakeError> {
    let ephemeral = KeyPair::generate();
    let mut noise = NoiseState::new(&WA_CONN_HEADER);
    noise.authenticate(&ephemeral.public);

    // -> e
    let hello = HandshakeMessage {
        client_hello: Some(ClientHello {
            ephemeral: Some(ephemeral.public.to_vec()),
        }),
        server_hello: None,
        client_finish: None,
    };
    transport
        .send_frame(Bytes::from(hello.encode_to_vec()))
        .await?;

    // <- e, ee, s, es
    let response = timeout(HANDSHAKE_RESPONSE_TIMEOUT, frames.recv())
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .ok_or(HandshakeError::Closed)?;
    let server_hello = HandshakeMessage::decode(response.as_ref())
        .map_err(|e| HandshakeError::InvalidResponse(e.to_string()))?
        .server_hello
        .ok_or_else(|| HandshakeError::InvalidResponse("missing server_hello".into()))?;

    let server_ephemeral = read_key(server_hello.ephemeral, "ephemeral")?;
    let static_ciphertext = server_hello
        .r#static
        .ok_or_else(|| HandshakeError::InvalidResponse("missing static".into()))?;
    let cert_ciphertext = server_hello
        .payload
        .ok_or_else(|| HandshakeError::InvalidResponse("missing payload".into()))?;

    noise.authenticate(&server_ephemeral);
    noise.mix_shared_secret(&ephemeral.private, &server_ephemeral);

    let server_static = read_key(Some(noise.decrypt(&static_ciphertext)?), "static")?;
    noise.mix_shared_secret(&ephemeral.private, &server_static);

    // Certificate chain verification is delegated to the embedder.
    let _certificate = noise.decrypt(&cert_ciphertext)?;

    // -> s, se, payload
    let static_encrypted = noise.encrypt(&device.noise_key.public)?;
    noise.mix_shared_secret(&device.noise_key.private, &server_ephemeral);

    let payload = client_payload(device);
    let payload_encrypted = noise.encrypt(&payload.encode_to_vec())?;

    let finish = HandshakeMessage {
        client_hello: None,
        server_hello: None,
        client_finish: Some(ClientFinish {
            r#static: Some(static_encrypted),
            payload: Some(payload_encrypted),
        }),
    };
    transport
        .send_frame(Bytes::from(finish.encode_to_vec()))
        .await?;

    let (write, read) = noise.finish();
    Ok(NoiseSocket::new(transport.clone(), write, read))
}

fn client_payload(device: &Device) -> proto::ClientPayload {
    match &device.id {
        Some(jid) => proto::login_payload(
            jid.user.parse().unwrap_or_default(),
            jid.device as u32,
            (!device.push_name.is_empty()).then_some(device.push_name.as_str()),
        ),
        None => {
            let signature = device.signed_pre_key.signature.unwrap_or([0u8; 64]);
            proto::registration_payload(
                device.registration_id,
                &device.identity_key.public,
                device.signed_pre_key.key_id,
                &device.signed_pre_key.key_pair.public,
                &signature,
            )
        }
    }
}

fn read_key(bytes: Option<Vec<u8>>, name: &str) -> Result<[u8; 32], HandshakeError> {
    let bytes = bytes.ok_or_else(|| HandshakeError::InvalidResponse(format!("missing {name}")))?;
    bytes
        .try_into()
        .map_err(|_| HandshakeError::InvalidResponse(format!("{name} key has wrong length")))
}
