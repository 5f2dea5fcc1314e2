//! The client: session state, inbound routing, the ordered handler
//! queue, event fan-out and the connection lifecycle.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::RngCore;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::binary::{self, Node};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::socket::{
    self, Connector, FrameConn, NoiseSocket, WebSocketConnector,
};
use crate::store::Store;
use crate::types::events::Event;
use crate::types::SERVER_JID;

pub(crate) const HANDLER_QUEUE_SIZE: usize = 2048;

/// Handler ids are monotonic across every client in the process.
static NEXT_HANDLER_ID: AtomicU32 = AtomicU32::new(0);

/// A function receiving all events dispatched by the client.
///
/// Handlers run synchronously on the dispatching task; hand off to your
/// own task for anything slow.
pub type EventHandler = Box<dyn Fn(&Event) + Send + Sync>;

struct WrappedEventHandler {
    id: u32,
    handler: EventHandler,
}

pub(crate) type NodeHandler = fn(Arc<Client>, Node) -> BoxFuture<'static, ()>;

macro_rules! node_handler {
    ($method:ident) => {
        (|cli: Arc<Client>, node: Node| -> BoxFuture<'static, ()> {
            Box::pin(async move { cli.$method(node).await })
        }) as NodeHandler
    };
}

/// Everything necessary to connect to and interact with the WhatsApp
/// web API.
pub struct Client {
    pub store: Arc<Store>,
    pub(crate) config: ClientConfig,
    connector: Arc<dyn Connector>,

    /// The active socket. Read lock to send, write lock to swap; at
    /// most one live socket at a time.
    socket: RwLock<Option<Arc<NoiseSocket>>>,

    expected_disconnect: AtomicBool,
    enable_auto_reconnect: AtomicBool,
    pub(crate) auto_reconnect_errors: AtomicU32,
    pub(crate) last_successful_connect: std::sync::Mutex<Option<DateTime<Utc>>>,
    is_logged_in: AtomicBool,

    pub(crate) response_waiters: std::sync::Mutex<HashMap<String, oneshot::Sender<Node>>>,
    pub(crate) message_retries: std::sync::Mutex<HashMap<String, u32>>,

    node_handlers: HashMap<&'static str, NodeHandler>,
    handler_tx: mpsc::Sender<Node>,
    handler_rx: Mutex<mpsc::Receiver<Node>>,

    event_handlers: std::sync::RwLock<Vec<WrappedEventHandler>>,

    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,

    pub(crate) upload_pre_keys_lock: Mutex<()>,
}

impl Client {
    /// Creates a client over the production WebSocket endpoint.
    pub fn new(store: Arc<Store>) -> Arc<Self> {
        Self::with_config(store, ClientConfig::default())
    }

    pub fn with_config(store: Arc<Store>, config: ClientConfig) -> Arc<Self> {
        let connector = Arc::new(WebSocketConnector {
            url: config.endpoint.clone(),
        });
        Self::with_connector(store, config, connector)
    }

    /// Creates a client dialing through a custom [`Connector`]; the
    /// scripted-server test harness uses an in-memory one.
    pub fn with_connector(
        store: Arc<Store>,
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let mut unique_id = [0u8; 2];
        rand::thread_rng().fill_bytes(&mut unique_id);
        let (handler_tx, handler_rx) = mpsc::channel(HANDLER_QUEUE_SIZE);

        Arc::new(Self {
            store,
            enable_auto_reconnect: AtomicBool::new(config.enable_auto_reconnect),
            config,
            connector,
            socket: RwLock::new(None),
            expected_disconnect: AtomicBool::new(false),
            auto_reconnect_errors: AtomicU32::new(0),
            last_successful_connect: std::sync::Mutex::new(None),
            is_logged_in: AtomicBool::new(false),
            response_waiters: std::sync::Mutex::new(HashMap::new()),
            message_retries: std::sync::Mutex::new(HashMap::new()),
            node_handlers: Self::node_handlers(),
            handler_tx,
            handler_rx: Mutex::new(handler_rx),
            event_handlers: std::sync::RwLock::new(Vec::new()),
            unique_id: format!("{:02x}{:02x}-", unique_id[0], unique_id[1]),
            id_counter: AtomicU64::new(0),
            upload_pre_keys_lock: Mutex::new(()),
        })
    }

    fn node_handlers() -> HashMap<&'static str, NodeHandler> {
        HashMap::from([
            ("message", node_handler!(handle_message)),
            ("receipt", node_handler!(handle_receipt)),
            ("chatstate", node_handler!(handle_chat_state)),
            ("notification", node_handler!(handle_notification)),
            ("success", node_handler!(handle_connect_success)),
            ("failure", node_handler!(handle_connect_failure)),
            ("stream:error", node_handler!(handle_stream_error)),
            ("iq", node_handler!(handle_iq)),
            ("ib", node_handler!(handle_ib)),
        ])
    }

    // ---- lifecycle -----------------------------------------------------

    /// Connects to the server. After the handshake the client either
    /// authenticates (paired device) or starts the pairing exchange,
    /// emitting [`Event::QR`].
    pub fn connect<'a>(
        self: &'a Arc<Self>,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
        let mut guard = self.socket.write().await;
        if let Some(current) = guard.as_ref() {
            if current.is_connected() {
                return Err(ClientError::AlreadyConnected);
            }
            self.unlocked_disconnect(&mut guard).await;
        }

        self.reset_expected_disconnect();
        let FrameConn {
            transport,
            mut frames,
        } = self.connector.dial().await?;

        let device = self.store.device_snapshot();
        let noise_socket = match socket::do_handshake(&device, &transport, &mut frames).await {
            Ok(ns) => Arc::new(ns),
            Err(err) => {
                transport.stop(false).await;
                return Err(ClientError::Handshake(err));
            }
        };
        *guard = Some(noise_socket.clone());

        let token = noise_socket.context();
        tokio::spawn(self.clone().read_pump(noise_socket, frames));
        tokio::spawn(self.clone().keepalive_loop(token.clone()));
        tokio::spawn(self.clone().handler_queue_loop(token));
        Ok(())
        })
    }

    /// Stops the active socket, releasing all outstanding waiters with
    /// a disconnect error. Does not emit [`Event::Disconnected`].
    pub async fn disconnect(&self) {
        let mut guard = self.socket.write().await;
        self.unlocked_disconnect(&mut guard).await;
    }

    async fn unlocked_disconnect(&self, guard: &mut Option<Arc<NoiseSocket>>) {
        if let Some(noise_socket) = guard.take() {
            noise_socket.stop(true).await;
            self.clear_response_waiters();
        }
    }

    /// Sends the unlink request, then disconnects and deletes the
    /// device store. If the request fails, neither happens.
    pub async fn logout(self: &Arc<Self>) -> Result<(), ClientError> {
        let id = self.store.id().ok_or(ClientError::NotLoggedIn)?;
        self.send_iq(crate::request::InfoQuery {
            namespace: "md",
            query_type: crate::request::InfoQueryType::Set,
            to: SERVER_JID.clone(),
            target: None,
            id: None,
            content: Some(vec![Node::with_attrs(
                "remove-companion-device",
                [("jid", id.into()), ("reason", "user_initiated".into())],
            )]),
            timeout: None,
        })
        .await?;
        self.expect_disconnect();
        self.disconnect().await;
        self.store.delete().await?;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.socket
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Whether the session is authenticated. Connected does not imply
    /// logged in; wait for [`Event::Connected`].
    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in.load(Ordering::Relaxed)
    }

    pub(crate) fn set_logged_in(&self, logged_in: bool) {
        self.is_logged_in.store(logged_in, Ordering::Relaxed);
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.enable_auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    // ---- expected-disconnect flag --------------------------------------

    pub(crate) fn expect_disconnect(&self) {
        self.expected_disconnect.store(true, Ordering::SeqCst);
    }

    fn reset_expected_disconnect(&self) {
        self.expected_disconnect.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_expected_disconnect(&self) -> bool {
        self.expected_disconnect.load(Ordering::SeqCst)
    }

    // ---- inbound path --------------------------------------------------

    async fn read_pump(
        self: Arc<Self>,
        noise_socket: Arc<NoiseSocket>,
        mut frames: mpsc::Receiver<bytes::Bytes>,
    ) {
        let token = noise_socket.context();
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            match noise_socket.decrypt_frame(&frame) {
                Ok(plaintext) => self.handle_frame(&plaintext),
                Err(err) => {
                    warn!(target: "wamd::recv", %err, "failed to decrypt frame");
                }
            }
        }
        let remote = !noise_socket.stopped_locally();
        self.on_disconnect(noise_socket, remote).await;
    }

    /// Routes one decrypted frame: response waiter, then tag handler
    /// queue, otherwise dropped.
    pub(crate) fn handle_frame(self: &Arc<Self>, payload: &[u8]) {
        let decompressed = match binary::unpack(payload) {
            Ok(d) => d,
            Err(err) => {
                warn!(target: "wamd::recv", %err, "failed to decompress frame");
                debug!(target: "wamd::recv", frame = %hex::encode(payload), "errored frame");
                return;
            }
        };
        let node = match binary::unmarshal(&decompressed) {
            Ok(n) => n,
            Err(err) => {
                warn!(target: "wamd::recv", %err, "failed to decode node in frame");
                debug!(target: "wamd::recv", frame = %hex::encode(&decompressed), "errored frame");
                return;
            }
        };
        debug!(target: "wamd::recv", "{node}");

        if node.tag == "xmlstreamend" {
            if !self.is_expected_disconnect() {
                warn!(target: "wamd::recv", "received stream end frame");
            }
            return;
        }

        if self.receive_response(&node) {
            return;
        }

        if self.node_handlers.contains_key(node.tag.as_str()) {
            match self.handler_tx.try_send(node) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(node)) => {
                    // Delivery is preserved by the detached push below,
                    // but ordering across the overflow boundary is not.
                    warn!(
                        target: "wamd::recv",
                        "handler queue is full, message ordering is no longer guaranteed"
                    );
                    let tx = self.handler_tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(node).await;
                    });
                }
                Err(mpsc::error::TrySendError::Closed(node)) => {
                    debug!(target: "wamd::recv", tag = %node.tag, "handler queue closed, dropping node");
                }
            }
        } else {
            debug!(target: "wamd::recv", tag = %node.tag, "didn't handle node");
        }
    }

    /// Single worker draining the handler queue in arrival order.
    async fn handler_queue_loop(self: Arc<Self>, token: CancellationToken) {
        let mut rx = self.handler_rx.lock().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                node = rx.recv() => match node {
                    Some(node) => self.run_node_handler(node).await,
                    None => break,
                },
            }
        }
    }

    async fn run_node_handler(self: &Arc<Self>, node: Node) {
        let Some(handler) = self.node_handlers.get(node.tag.as_str()) else {
            return;
        };
        let tag = node.tag.clone();
        use futures::FutureExt;
        if let Err(panic) = AssertUnwindSafe(handler(self.clone(), node))
            .catch_unwind()
            .await
        {
            error!(
                target: "wamd",
                tag = %tag,
                panic = ?panic_message(&panic),
                backtrace = %std::backtrace::Backtrace::force_capture(),
                "node handler panicked"
            );
        }
    }

    // ---- outbound path -------------------------------------------------

    /// Serializes and sends one node over the encrypted channel.
    pub async fn send_node(&self, node: Node) -> Result<(), ClientError> {
        let noise_socket = self.socket.read().await.clone();
        let Some(noise_socket) = noise_socket else {
            return Err(ClientError::NotConnected);
        };
        debug!(target: "wamd::send", "{node}");
        let payload = binary::pack(&binary::marshal(&node));
        noise_socket.send_frame(&payload).await.map_err(Into::into)
    }

    // ---- disconnect bookkeeping ----------------------------------------

    /// Invoked when a socket's inbound stream ends. A socket that is no
    /// longer the active one is a stale callback from a previous
    /// incarnation and is ignored.
    async fn on_disconnect(self: &Arc<Self>, noise_socket: Arc<NoiseSocket>, remote: bool) {
        noise_socket.stop(false).await;
        let mut guard = self.socket.write().await;
        if guard
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &noise_socket))
        {
            *guard = None;
            self.clear_response_waiters();
            if !self.is_expected_disconnect() && remote {
                debug!(target: "wamd", "emitting Disconnected event");
                let cli = self.clone();
                tokio::spawn(async move { cli.dispatch_event(&Event::Disconnected) });
                let cli = self.clone();
                tokio::spawn(async move { cli.auto_reconnect().await });
            } else if remote {
                debug!(target: "wamd", "disconnect was expected, not emitting event");
            } else {
                debug!(target: "wamd", "disconnect after local stop");
            }
        } else {
            debug!(target: "wamd", "ignoring disconnect of stale socket");
        }
    }

    async fn auto_reconnect(self: Arc<Self>) {
        if !self.enable_auto_reconnect.load(Ordering::Relaxed) || self.store.id().is_none() {
            return;
        }
        loop {
            let errors = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = Duration::from_secs(errors as u64 * 2);
            debug!(target: "wamd", ?delay, "automatically reconnecting");
            sleep(delay).await;
            match self.connect().await {
                Err(ClientError::AlreadyConnected) => {
                    debug!(target: "wamd", "already connected after autoreconnect sleep");
                    return;
                }
                Err(err) => {
                    error!(target: "wamd", %err, "error reconnecting after autoreconnect sleep");
                }
                Ok(()) => return,
            }
        }
    }

    /// Reconnect cycle used by server-initiated stream restarts (515).
    /// The caller raises the expected-disconnect flag before spawning
    /// this, so a remote close racing the spawn is already suppressed.
    pub(crate) async fn reconnect_after_stream_restart(self: Arc<Self>) {
        self.disconnect().await;
        if let Err(err) = self.connect().await {
            error!(target: "wamd", %err, "failed to reconnect after stream restart");
        }
    }

    // ---- event bus -----------------------------------------------------

    /// Registers a function to receive all events. The returned id can
    /// be passed to [`remove_event_handler`](Self::remove_event_handler).
    pub fn add_event_handler<F>(&self, handler: F) -> u32
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed) + 1;
        self.event_handlers
            .write()
            .unwrap()
            .push(WrappedEventHandler {
                id,
                handler: Box::new(handler),
            });
        id
    }

    /// Removes a previously registered event handler. Returns true when
    /// the id was registered.
    pub fn remove_event_handler(&self, id: u32) -> bool {
        let mut handlers = self.event_handlers.write().unwrap();
        let before = handlers.len();
        handlers.retain(|h| h.id != id);
        handlers.len() < before
    }

    pub fn remove_event_handlers(&self) {
        self.event_handlers.write().unwrap().clear();
    }

    /// Fans an event out to all subscribers in registration order. A
    /// panicking subscriber is logged and skipped; the rest still run.
    pub fn dispatch_event(&self, event: &Event) {
        let handlers = self.event_handlers.read().unwrap();
        for wrapped in handlers.iter() {
            if let Err(panic) =
                std::panic::catch_unwind(AssertUnwindSafe(|| (wrapped.handler)(event)))
            {
                error!(
                    target: "wamd",
                    handler_id = wrapped.id,
                    panic = ?panic_message(&panic),
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "event handler panicked"
                );
            }
        }
    }

    // ---- misc ----------------------------------------------------------

    pub fn last_successful_connect(&self) -> Option<DateTime<Utc>> {
        *self.last_successful_connect.lock().unwrap()
    }

    pub(crate) fn increment_message_retry(&self, message_id: &str) -> u32 {
        let mut retries = self.message_retries.lock().unwrap();
        let count = retries.entry(message_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Client {
    pub(crate) async fn keepalive_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.keep_alive_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(err) = self.send_keepalive().await {
                        warn!(target: "wamd", %err, "keepalive ping failed");
                    }
                }
            }
        }
    }

    async fn send_keepalive(&self) -> Result<(), crate::error::IqError> {
        self.send_iq(crate::request::InfoQuery {
            namespace: "w:p",
            query_type: crate::request::InfoQueryType::Get,
            to: SERVER_JID.clone(),
            target: None,
            id: None,
            content: Some(vec![Node::new("ping")]),
            timeout: Some(self.config.keep_alive_interval),
        })
        .await
        .map(|_| ())
    }
}

impl Client {
    /// Marks authentication state on an incoming `success` node; the
    /// heavier post-connect work lives in `connection.rs`.
    pub(crate) fn note_successful_connect(&self) {
        *self.last_successful_connect.lock().unwrap() = Some(Utc::now());
        self.auto_reconnect_errors.store(0, Ordering::SeqCst);
        self.set_logged_in(true);
        info!(target: "wamd", "successfully authenticated");
    }
}
