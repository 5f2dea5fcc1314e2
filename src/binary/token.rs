//! Dictionary of strings that occur constantly on the wire.
//!
//! Tags, attribute names and common attribute values are encoded as a
//! single byte referencing this table instead of a length-prefixed
//! string. The table is append-only: reordering it breaks decoding of
//! anything encoded with an older layout.

/// First byte value used for dictionary references; values below are
/// reserved for structural markers.
pub const TOKEN_BASE: u8 = 0x08;

pub static SINGLE_BYTE_TOKENS: &[&str] = &[
    "iq",
    "message",
    "receipt",
    "chatstate",
    "notification",
    "presence",
    "success",
    "failure",
    "stream:error",
    "ib",
    "ack",
    "xmlstreamend",
    "id",
    "type",
    "from",
    "to",
    "xmlns",
    "participant",
    "jid",
    "code",
    "reason",
    "name",
    "notify",
    "t",
    "get",
    "set",
    "result",
    "error",
    "text",
    "s.whatsapp.net",
    "g.us",
    "broadcast",
    "lid",
    "c.us",
    "usync",
    "query",
    "list",
    "user",
    "contact",
    "devices",
    "device-list",
    "device",
    "version",
    "sid",
    "mode",
    "last",
    "index",
    "context",
    "interactive",
    "background",
    "count",
    "value",
    "encrypt",
    "registration",
    "key",
    "identity",
    "skey",
    "prekeys",
    "w:p",
    "w:profile:picture",
    "w:g2",
    "passive",
    "active",
    "md",
    "ping",
    "pong",
    "composing",
    "paused",
    "available",
    "unavailable",
    "read",
    "retry",
    "conflict",
    "device_removed",
    "pair-device",
    "pair-success",
    "ref",
    "platform",
    "business",
    "biz",
    "picture",
    "remove",
    "add",
    "promote",
    "demote",
    "subject",
    "remove-companion-device",
    "user_initiated",
    "url",
    "preview",
    "image",
    "author",
    "true",
    "false",
    "verified_name",
    "status",
    "enc",
    "offline",
];

/// Looks up the string for a dictionary byte.
pub fn get_token(index: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS.get(index as usize).copied()
}

/// Looks up the dictionary byte for a string.
pub fn get_token_index(s: &str) -> Option<u8> {
    SINGLE_BYTE_TOKENS.iter().position(|t| *t == s).map(|i| i as u8)
}
