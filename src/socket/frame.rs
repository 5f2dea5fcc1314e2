//! Frame transport: length-prefixed byte frames over a WebSocket.
//!
//! The transport is opaque to frame contents. It is modeled as a trait
//! so the lifecycle can dial fresh transports on reconnect and tests
//! can substitute an in-memory pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Primary WhatsApp web endpoint.
pub const DEFAULT_URL: &str = "wss://web.whatsapp.com/ws/chat";

/// Connection header sent in front of the first frame:
/// 'W', 'A', magic, dictionary version.
pub const WA_CONN_HEADER: [u8; 4] = [b'W', b'A', 6, 3];

const FRAME_LENGTH_SIZE: usize = 3;
/// Largest frame expressible with the 3-byte length prefix.
pub const FRAME_MAX_SIZE: usize = (1 << 24) - 1;

#[derive(Debug, Clone, Error)]
pub enum SocketError {
    #[error("socket is not connected")]
    NotConnected,
    #[error("frame too large ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("frame encryption failed")]
    Crypto,
}

/// One direction-agnostic framed connection (§ transport contract):
/// push-style inbound frames, awaitable outbound sends, a cancellation
/// token that derived tasks bind to, and an idempotent stop.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Sends one opaque frame. Fails with `NotConnected` after stop.
    async fn send_frame(&self, frame: Bytes) -> Result<(), SocketError>;

    /// Stops the transport. `graceful` sends a close message first.
    async fn stop(&self, graceful: bool);

    fn is_connected(&self) -> bool;

    /// Cancelled when this transport stops, remotely or locally.
    fn context(&self) -> CancellationToken;

    /// True when the stop was initiated locally rather than observed
    /// from the peer; consulted when the inbound stream ends.
    fn stopped_locally(&self) -> bool;
}

/// A freshly dialed transport plus its inbound frame stream.
pub struct FrameConn {
    pub transport: Arc<dyn FrameTransport>,
    pub frames: mpsc::Receiver<Bytes>,
}

/// Factory dialing a new transport per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self) -> Result<FrameConn, SocketError>;
}

/// Production connector: WebSocket to the WhatsApp endpoint.
pub struct WebSocketConnector {
    pub url: String,
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn dial(&self) -> Result<FrameConn, SocketError> {
        WebSocketTransport::connect(&self.url).await
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket-backed frame transport. Outbound frames get a 3-byte
/// big-endian length prefix, with the connection header prepended to
/// the very first one. Inbound websocket messages are reassembled into
/// frames (one message may carry several frames or a partial one).
pub struct WebSocketTransport {
    sink: Mutex<WsSink>,
    connected: AtomicBool,
    local_stop: AtomicBool,
    header_sent: AtomicBool,
    token: CancellationToken,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<FrameConn, SocketError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        let (sink, stream) = ws.split();

        let transport = Arc::new(Self {
            sink: Mutex::new(sink),
            connected: AtomicBool::new(true),
            local_stop: AtomicBool::new(false),
            header_sent: AtomicBool::new(false),
            token: CancellationToken::new(),
        });

        let (frame_tx, frame_rx) = mpsc::channel(32);
        tokio::spawn(Self::read_loop(transport.clone(), stream, frame_tx));

        Ok(FrameConn {
            transport,
            frames: frame_rx,
        })
    }

    async fn read_loop(
        transport: Arc<Self>,
        mut stream: impl futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
        frame_tx: mpsc::Sender<Bytes>,
    ) {
        let mut buffer = BytesMut::new();
        'read: loop {
            let message = tokio::select! {
                _ = transport.token.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Binary(data))) => {
                    buffer.extend_from_slice(&data);
                    while let Some(frame) = take_frame(&mut buffer) {
                        if frame_tx.send(frame).await.is_err() {
                            break 'read;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(target: "wamd::socket", ?frame, "server closed websocket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(target: "wamd::socket", %err, "websocket read error");
                    break;
                }
                None => break,
            }
        }
        transport.connected.store(false, Ordering::SeqCst);
        transport.token.cancel();
        // frame_tx drops here; the receiver observing None is the
        // disconnect signal for the session.
    }
}

/// Splits one complete length-prefixed frame off the reassembly buffer.
fn take_frame(buffer: &mut BytesMut) -> Option<Bytes> {
    if buffer.len() < FRAME_LENGTH_SIZE {
        return None;
    }
    let length = ((buffer[0] as usize) << 16) | ((buffer[1] as usize) << 8) | buffer[2] as usize;
    if buffer.len() < FRAME_LENGTH_SIZE + length {
        return None;
    }
    let mut frame = buffer.split_to(FRAME_LENGTH_SIZE + length);
    let _prefix = frame.split_to(FRAME_LENGTH_SIZE);
    Some(frame.freeze())
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send_frame(&self, frame: Bytes) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }
        if frame.len() > FRAME_MAX_SIZE {
            return Err(SocketError::FrameTooLarge(frame.len()));
        }

        let header = if self.header_sent.swap(true, Ordering::SeqCst) {
            &[][..]
        } else {
            &WA_CONN_HEADER[..]
        };
        let mut data = Vec::with_capacity(header.len() + FRAME_LENGTH_SIZE + frame.len());
        data.extend_from_slice(header);
        data.extend_from_slice(&[
            (frame.len() >> 16) as u8,
            (frame.len() >> 8) as u8,
            frame.len() as u8,
        ]);
        data.extend_from_slice(&frame);

        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(data.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            SocketError::WebSocket(e.to_string())
        })
    }

    async fn stop(&self, graceful: bool) {
        self.local_stop.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if graceful {
            let mut sink = self.sink.lock().await;
            if let Err(err) = sink.send(Message::Close(None)).await {
                debug!(target: "wamd::socket", %err, "error sending close message");
            }
        }
        self.token.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    fn stopped_locally(&self) -> bool {
        self.local_stop.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_frame_reassembles_partials() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&[0, 0, 4, 1, 2]);
        assert_eq!(take_frame(&mut buffer), None);
        buffer.extend_from_slice(&[3, 4]);
        assert_eq!(take_frame(&mut buffer).unwrap().as_ref(), &[1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn take_frame_splits_coalesced_frames() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&[0, 0, 1, 0xAA, 0, 0, 2, 0xBB, 0xCC]);
        assert_eq!(take_frame(&mut buffer).unwrap().as_ref(), &[0xAA]);
        assert_eq!(take_frame(&mut buffer).unwrap().as_ref(), &[0xBB, 0xCC]);
        assert_eq!(take_frame(&mut buffer), None);
    }
}
