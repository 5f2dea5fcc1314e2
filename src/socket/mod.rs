//! WebSocket transport, Noise handshake and the encrypted frame
//! channel they produce.

mod frame;
mod handshake;
mod noise;

pub use frame::{
    Connector, FrameConn, FrameTransport, SocketError, WebSocketConnector, WebSocketTransport,
    DEFAULT_URL, FRAME_MAX_SIZE, WA_CONN_HEADER,
};
pub use handshake::HandshakeError;
pub use noise::NoiseSocket;

pub(crate) use handshake::do_handshake;
