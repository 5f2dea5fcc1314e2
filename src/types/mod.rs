//! Core protocol types: JIDs, presence states and the event surface.

mod jid;

pub mod events;

pub use jid::*;

/// Presence states for [`Client::send_presence`](crate::Client::send_presence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Available => "available",
            Presence::Unavailable => "unavailable",
        }
    }
}

/// Chat-level presence (typing state) for
/// [`Client::send_chat_presence`](crate::Client::send_chat_presence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

impl ChatPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatPresence::Composing => "composing",
            ChatPresence::Paused => "paused",
        }
    }
}

/// Basic group metadata recorded by the device store when group
/// notifications arrive.
#[derive(Debug, Clone, Default)]
pub struct GroupMetadata {
    pub jid: JID,
    pub name: String,
    pub topic: String,
    pub participants: Vec<JID>,
}
