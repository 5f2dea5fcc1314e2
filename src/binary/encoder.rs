//! Node tree → bytes.

use super::node::{AttrValue, Node, NodeContent};
use super::token::{get_token_index, TOKEN_BASE};
use crate::types::JID;

// Structural markers. Everything from TOKEN_BASE up is a dictionary
// reference, so these must stay below it.
pub(super) const MARK_EMPTY: u8 = 0x00;
pub(super) const MARK_ATTR_STRING: u8 = 0x01;
pub(super) const MARK_ATTR_JID: u8 = 0x02;
pub(super) const MARK_ATTR_INT: u8 = 0x03;
pub(super) const MARK_CHILDREN: u8 = 0x04;
pub(super) const MARK_BINARY: u8 = 0x05;
pub(super) const MARK_STRING_8: u8 = 0xFC;
pub(super) const MARK_STRING_16: u8 = 0xFD;
pub(super) const MARK_STRING_32: u8 = 0xFE;

/// Encodes a node into its wire form.
pub fn marshal(node: &Node) -> Vec<u8> {
    let mut encoder = Encoder::new();
    encoder.write_node(node);
    encoder.data
}

pub struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self { data: Vec::with_capacity(256) }
    }

    fn write_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn write_string(&mut self, s: &str) {
        if s.is_empty() {
            self.write_byte(MARK_EMPTY);
            return;
        }
        if let Some(index) = get_token_index(s) {
            self.write_byte(TOKEN_BASE + index);
            return;
        }
        let bytes = s.as_bytes();
        match bytes.len() {
            len if len < 1 << 8 => {
                self.write_byte(MARK_STRING_8);
                self.write_byte(len as u8);
            }
            len if len < 1 << 16 => {
                self.write_byte(MARK_STRING_16);
                self.write_bytes(&(len as u16).to_be_bytes());
            }
            len => {
                self.write_byte(MARK_STRING_32);
                self.write_bytes(&(len as u32).to_be_bytes());
            }
        }
        self.write_bytes(bytes);
    }

    fn write_jid(&mut self, jid: &JID) {
        self.write_string(&jid.user);
        self.write_string(&jid.server);
        self.write_byte(jid.agent);
        self.write_bytes(&jid.device.to_be_bytes());
    }

    fn write_attr_value(&mut self, value: &AttrValue) {
        match value {
            AttrValue::String(s) => {
                self.write_byte(MARK_ATTR_STRING);
                self.write_string(s);
            }
            AttrValue::JID(jid) => {
                self.write_byte(MARK_ATTR_JID);
                self.write_jid(jid);
            }
            AttrValue::Int(n) => {
                self.write_byte(MARK_ATTR_INT);
                self.write_bytes(&n.to_be_bytes());
            }
        }
    }

    fn write_node(&mut self, node: &Node) {
        self.write_string(&node.tag);
        debug_assert!(node.attrs.len() < 256);
        self.write_byte(node.attrs.len() as u8);
        for (key, value) in &node.attrs {
            self.write_string(key);
            self.write_attr_value(value);
        }
        match &node.content {
            NodeContent::None => self.write_byte(MARK_EMPTY),
            NodeContent::Children(children) => {
                self.write_byte(MARK_CHILDREN);
                self.write_bytes(&(children.len() as u16).to_be_bytes());
                for child in children {
                    self.write_node(child);
                }
            }
            NodeContent::Bytes(bytes) => {
                self.write_byte(MARK_BINARY);
                self.write_bytes(&(bytes.len() as u32).to_be_bytes());
                self.write_bytes(bytes);
            }
        }
    }
}
