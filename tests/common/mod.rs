//! Scripted-server harness: an in-memory frame transport plus the
//! responder side of the Noise handshake, so tests can drive the full
//! session runtime deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use wamd::binary::{self, Node};
use wamd::crypto::{Cipher, KeyPair, NoiseState};
use wamd::proto::{ClientPayload, HandshakeMessage, ServerHello};
use wamd::socket::{Connector, FrameConn, FrameTransport, SocketError, WA_CONN_HEADER};
use wamd::store::Store;
use wamd::types::events::Event;
use wamd::{Client, ClientConfig};

/// In-memory frame transport: frames pass through channels instead of a
/// websocket.
pub struct MemoryTransport {
    to_server: mpsc::UnboundedSender<Bytes>,
    connected: AtomicBool,
    local_stop: AtomicBool,
    token: CancellationToken,
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frame(&self, frame: Bytes) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }
        self.to_server
            .send(frame)
            .map_err(|_| SocketError::NotConnected)
    }

    async fn stop(&self, _graceful: bool) {
        self.local_stop.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
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

/// Server-side endpoints of one in-memory connection.
pub struct ServerConn {
    pub to_client: mpsc::Sender<Bytes>,
    pub from_client: mpsc::UnboundedReceiver<Bytes>,
    pub token: CancellationToken,
}

pub fn memory_conn() -> (FrameConn, ServerConn) {
    let (client_tx, client_rx) = mpsc::channel(256);
    let (server_tx, server_rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();

    let transport = Arc::new(MemoryTransport {
        to_server: server_tx,
        connected: AtomicBool::new(true),
        local_stop: AtomicBool::new(false),
        token: token.clone(),
    });

    (
        FrameConn {
            transport,
            frames: client_rx,
        },
        ServerConn {
            to_client: client_tx,
            from_client: server_rx,
            token,
        },
    )
}

/// Connector handing each dial's server side to the test.
pub struct ScriptedConnector {
    dials: Mutex<mpsc::UnboundedSender<ServerConn>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                dials: Mutex::new(tx),
            }),
            rx,
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn dial(&self) -> Result<FrameConn, SocketError> {
        let (client_side, server_side) = memory_conn();
        self.dials
            .lock()
            .await
            .send(server_side)
            .map_err(|_| SocketError::NotConnected)?;
        Ok(client_side)
    }
}

/// An established encrypted session as seen by the scripted server.
pub struct ServerSession {
    pub conn: ServerConn,
    write: Cipher,
    read: Cipher,
    /// The client payload received in the handshake finish: carries
    /// pairing data for an unpaired device, a username otherwise.
    pub client_payload: ClientPayload,
}

/// Runs the responder side of the Noise handshake over a fresh
/// connection.
pub async fn accept_session(mut conn: ServerConn) -> ServerSession {
    let frame = conn
        .from_client
        .recv()
        .await
        .expect("client hello frame");
    let hello = HandshakeMessage::decode(frame.as_ref())
        .expect("decode client hello")
        .client_hello
        .expect("client hello present");
    let client_ephemeral: [u8; 32] = hello
        .ephemeral
        .expect("client ephemeral")
        .try_into()
        .expect("32-byte ephemeral");

    let server_ephemeral = KeyPair::generate();
    let server_static = KeyPair::generate();

    let mut noise = NoiseState::new(&WA_CONN_HEADER);
    noise.authenticate(&client_ephemeral);
    noise.authenticate(&server_ephemeral.public);
    noise.mix_shared_secret(&server_ephemeral.private, &client_ephemeral);
    let static_ct = noise.encrypt(&server_static.public).unwrap();
    noise.mix_shared_secret(&server_static.private, &client_ephemeral);
    let cert_ct = noise.encrypt(b"scripted-server-certificate").unwrap();

    let server_hello = HandshakeMessage {
        client_hello: None,
        server_hello: Some(ServerHello {
            ephemeral: Some(server_ephemeral.public.to_vec()),
            r#static: Some(static_ct),
            payload: Some(cert_ct),
        }),
        client_finish: None,
    };
    conn.to_client
        .send(Bytes::from(server_hello.encode_to_vec()))
        .await
        .expect("send server hello");

    let frame = conn
        .from_client
        .recv()
        .await
        .expect("client finish frame");
    let finish = HandshakeMessage::decode(frame.as_ref())
        .expect("decode client finish")
        .client_finish
        .expect("client finish present");
    let client_static: [u8; 32] = noise
        .decrypt(&finish.r#static.expect("encrypted static"))
        .expect("decrypt client static")
        .try_into()
        .expect("32-byte static");
    noise.mix_shared_secret(&server_ephemeral.private, &client_static);
    let payload_plain = noise
        .decrypt(&finish.payload.expect("encrypted payload"))
        .expect("decrypt client payload");
    let client_payload =
        ClientPayload::decode(payload_plain.as_slice()).expect("decode client payload");

    // finish() returns (write, read) from the client's perspective.
    let (client_write, client_read) = noise.finish();
    ServerSession {
        conn,
        write: client_read,
        read: client_write,
        client_payload,
    }
}

impl ServerSession {
    pub async fn send_node(&mut self, node: &Node) {
        let payload = binary::pack(&binary::marshal(node));
        let ciphertext = self.write.encrypt(&payload, &[]).expect("encrypt frame");
        self.conn
            .to_client
            .send(Bytes::from(ciphertext))
            .await
            .expect("send frame to client");
    }

    pub async fn recv_node(&mut self) -> Option<Node> {
        let frame = self.conn.from_client.recv().await?;
        let plaintext = self.read.decrypt(&frame, &[]).expect("decrypt frame");
        let unpacked = binary::unpack(&plaintext).expect("unpack frame");
        Some(binary::unmarshal(&unpacked).expect("unmarshal node"))
    }

    /// Waits for the next node of the given tag, skipping others.
    pub async fn recv_node_with_tag(&mut self, tag: &str) -> Node {
        loop {
            let node = self.recv_node().await.expect("connection closed");
            if node.tag == tag {
                return node;
            }
        }
    }

    /// Answers the IQs the client fires after authenticating: the
    /// prekey count query, the prekey upload and the passive toggle.
    pub async fn serve_post_connect(&mut self) {
        loop {
            let iq = self.recv_node_with_tag("iq").await;
            let xmlns = iq.attr_str("xmlns").unwrap_or_default().to_string();
            match xmlns.as_str() {
                "encrypt" if iq.child_by_tag("count").is_some() => {
                    let mut count = Node::new("count");
                    count.set_attr("value", 100i64);
                    let mut reply = result_for(&iq);
                    reply.add_child(count);
                    self.send_node(&reply).await;
                }
                "encrypt" => {
                    self.send_node(&result_for(&iq)).await;
                }
                "passive" => {
                    self.send_node(&result_for(&iq)).await;
                    return;
                }
                other => panic!("unexpected post-connect iq namespace {other:?}"),
            }
        }
    }

    /// Authenticates the session and drains the post-connect IQs.
    pub async fn authenticate(&mut self) {
        self.send_node(&Node::new("success")).await;
        self.serve_post_connect().await;
    }

    /// Closes the connection from the server side.
    pub fn close(self) {
        drop(self.conn.to_client);
    }
}

/// Builds a `result` reply mirroring a request's id.
pub fn result_for(iq: &Node) -> Node {
    let mut reply = Node::new("iq");
    if let Some(id) = iq.attr_str("id") {
        reply.set_attr("id", id);
    }
    reply.set_attr("type", "result");
    reply
}

/// A client wired to a scripted connector, with a short request
/// timeout suitable for tests.
pub fn scripted_client(store: Arc<Store>) -> (Arc<Client>, mpsc::UnboundedReceiver<ServerConn>) {
    let config = ClientConfig::default().with_request_timeout(std::time::Duration::from_secs(5));
    scripted_client_with_config(store, config)
}

pub fn scripted_client_with_config(
    store: Arc<Store>,
    config: ClientConfig,
) -> (Arc<Client>, mpsc::UnboundedReceiver<ServerConn>) {
    let (connector, dials) = ScriptedConnector::new();
    (Client::with_connector(store, config, connector), dials)
}

/// Streams every dispatched event into a channel the test can await.
pub fn collect_events(client: &Client) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.add_event_handler(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Waits for the next event matching the predicate, panicking after a
/// bounded delay.
pub async fn expect_event<F>(
    events: &mut mpsc::UnboundedReceiver<Event>,
    what: &str,
    mut predicate: F,
) -> Event
where
    F: FnMut(&Event) -> bool,
{
    let deadline = std::time::Duration::from_secs(10);
    tokio::time::timeout(deadline, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
