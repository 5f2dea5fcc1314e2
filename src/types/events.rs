//! Events dispatched to functions registered with
//! [`Client::add_event_handler`](crate::Client::add_event_handler).

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::binary::Node;
use crate::types::JID;

/// QR is emitted after connecting when there's no session data in the
/// device store.
///
/// Render the strings in `codes` as QR codes one by one, switching to
/// the next whenever `timeout` has passed. When a code is scanned and
/// pairing completes, [`Event::PairSuccess`] follows. Running out of
/// codes makes the server close the websocket; reconnect for more.
#[derive(Debug, Clone)]
pub struct QR {
    pub codes: Vec<String>,
    pub timeout: Duration,
}

/// PairSuccess is emitted after the QR code has been scanned with the
/// phone and pairing completed. Generally followed by a websocket
/// reconnection, so wait for [`Event::Connected`] before sending.
#[derive(Debug, Clone)]
pub struct PairSuccess {
    pub id: JID,
    pub business_name: String,
    pub platform: String,
}

/// PairError is emitted when the server reports a successful scan but
/// finishing the pairing locally fails.
#[derive(Debug, Clone)]
pub struct PairError {
    pub id: JID,
    pub business_name: String,
    pub platform: String,
    pub error: String,
}

/// LoggedOut is emitted when the client has been unpaired from the
/// phone, either mid-stream or right after connecting.
#[derive(Debug, Clone)]
pub struct LoggedOut {
    /// True if triggered by a connect `failure` node, false for a
    /// `stream:error` node.
    pub on_connect: bool,
}

/// ConnectFailure is emitted for a `failure` node with an unknown
/// reason. Known reasons are turned into other events (e.g. LoggedOut).
#[derive(Debug, Clone)]
pub struct ConnectFailure {
    pub reason: String,
    pub raw: Node,
}

/// StreamError is emitted for a `stream:error` node with an unknown
/// code. Known codes are handled internally.
#[derive(Debug, Clone)]
pub struct StreamError {
    pub code: String,
    pub raw: Node,
}

/// Information about an incoming message node.
#[derive(Debug, Clone, Default)]
pub struct MessageInfo {
    pub id: String,
    pub chat: JID,
    pub sender: JID,
    pub is_from_me: bool,
    pub is_group: bool,
    pub push_name: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Message is emitted when a new message node arrives. The encrypted
/// payload is handed over raw; decryption belongs to the Signal layer.
#[derive(Debug, Clone)]
pub struct Message {
    pub info: MessageInfo,
    pub raw: Node,
}

/// UndecryptableMessage is emitted for a message node that carries no
/// usable ciphertext.
#[derive(Debug, Clone)]
pub struct UndecryptableMessage {
    pub info: MessageInfo,
    /// True if the sender didn't include a ciphertext for this device
    /// at all, as opposed to including one that can't be processed.
    pub is_unavailable: bool,
}

/// The kind of a delivery/read receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptType {
    Delivered,
    Read,
    Played,
    Retry,
    Other(String),
}

impl From<&str> for ReceiptType {
    fn from(s: &str) -> Self {
        match s {
            "" | "delivery" => ReceiptType::Delivered,
            "read" => ReceiptType::Read,
            "played" => ReceiptType::Played,
            "retry" => ReceiptType::Retry,
            other => ReceiptType::Other(other.to_string()),
        }
    }
}

/// Receipt is emitted when a message is delivered to or read by another
/// user, or when another of our devices reads an incoming message.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub message_ids: Vec<String>,
    pub chat: JID,
    pub sender: JID,
    pub receipt_type: ReceiptType,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Typing state reported by a chatstate node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPresenceState {
    Composing,
    Paused,
    Recording,
}

/// ChatPresence is emitted for typing notifications.
#[derive(Debug, Clone)]
pub struct ChatPresence {
    pub chat: JID,
    pub sender: JID,
    pub state: ChatPresenceState,
}

/// GroupInfo is emitted when the metadata of a group changes.
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub jid: JID,
    pub notify: String,
    pub sender: Option<JID>,
    pub timestamp: Option<DateTime<Utc>>,

    pub new_subject: Option<String>,
    pub join: Vec<JID>,
    pub leave: Vec<JID>,
    pub promote: Vec<JID>,
    pub demote: Vec<JID>,

    /// Sub-nodes the parser didn't recognize, kept raw.
    pub unknown_changes: Vec<Node>,
}

/// Picture is emitted when a user's profile picture or a group photo
/// changes. Use `get_profile_picture_info` to fetch the new image URL.
#[derive(Debug, Clone)]
pub struct Picture {
    pub jid: JID,
    pub author: JID,
    pub timestamp: Option<DateTime<Utc>>,
    pub remove: bool,
    pub picture_id: String,
}

/// HistorySync is emitted when the phone sends a blob of historical
/// messages. The payload is opaque to the session runtime.
#[derive(Debug, Clone)]
pub struct HistorySync {
    pub data: Vec<u8>,
}

/// PushName is emitted when a contact's push name changes.
#[derive(Debug, Clone)]
pub struct PushName {
    pub jid: JID,
    pub old_push_name: Option<String>,
    pub new_push_name: String,
}

/// All events the client can dispatch.
#[derive(Debug, Clone)]
pub enum Event {
    QR(QR),
    PairSuccess(PairSuccess),
    PairError(PairError),
    QRScannedWithoutMultidevice,
    Connected,
    Disconnected,
    LoggedOut(LoggedOut),
    ConnectFailure(ConnectFailure),
    StreamError(StreamError),
    Message(Message),
    UndecryptableMessage(UndecryptableMessage),
    Receipt(Receipt),
    ChatPresence(ChatPresence),
    GroupInfo(GroupInfo),
    Picture(Picture),
    HistorySync(HistorySync),
    PushName(PushName),
}
