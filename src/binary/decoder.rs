//! Bytes → node tree.

use thiserror::Error;

use super::encoder::{
    MARK_ATTR_INT, MARK_ATTR_JID, MARK_ATTR_STRING, MARK_BINARY, MARK_CHILDREN, MARK_EMPTY,
    MARK_STRING_16, MARK_STRING_32, MARK_STRING_8,
};
use super::node::{AttrValue, Node, NodeContent};
use super::token::{get_token, TOKEN_BASE};
use crate::types::JID;

/// Error produced when an inbound frame does not decode to a node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("unknown dictionary token {0:#04x}")]
    UnknownToken(u8),
    #[error("unknown marker {marker:#04x} at offset {offset}")]
    UnknownMarker { marker: u8, offset: usize },
    #[error("invalid utf-8 in string")]
    InvalidString,
    #[error("failed to inflate compressed frame")]
    Decompress,
    #[error("{0} leftover bytes after decoding")]
    LeftoverData(usize),
}

/// Decodes one node from the full input.
pub fn unmarshal(data: &[u8]) -> Result<Node, DecodeError> {
    let mut decoder = Decoder { data, index: 0 };
    let node = decoder.read_node()?;
    if decoder.index != data.len() {
        return Err(DecodeError::LeftoverData(data.len() - decoder.index));
    }
    Ok(node)
}

pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .data
            .get(self.index)
            .ok_or(DecodeError::UnexpectedEof(self.index))?;
        self.index += 1;
        Ok(b)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.index + len > self.data.len() {
            return Err(DecodeError::UnexpectedEof(self.index));
        }
        let slice = &self.data[self.index..self.index + len];
        self.index += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let offset = self.index;
        let marker = self.read_byte()?;
        let len = match marker {
            MARK_EMPTY => return Ok(String::new()),
            MARK_STRING_8 => self.read_byte()? as usize,
            MARK_STRING_16 => self.read_u16()? as usize,
            MARK_STRING_32 => self.read_u32()? as usize,
            token if token >= TOKEN_BASE && token < MARK_STRING_8 => {
                return get_token(token - TOKEN_BASE)
                    .map(str::to_string)
                    .ok_or(DecodeError::UnknownToken(token));
            }
            marker => return Err(DecodeError::UnknownMarker { marker, offset }),
        };
        let bytes = self.read_slice(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidString)
    }

    fn read_jid(&mut self) -> Result<JID, DecodeError> {
        let user = self.read_string()?;
        let server = self.read_string()?;
        let agent = self.read_byte()?;
        let device = self.read_u16()?;
        Ok(JID { user, agent, device, server })
    }

    fn read_attr_value(&mut self) -> Result<AttrValue, DecodeError> {
        let offset = self.index;
        match self.read_byte()? {
            MARK_ATTR_STRING => Ok(AttrValue::String(self.read_string()?)),
            MARK_ATTR_JID => Ok(AttrValue::JID(self.read_jid()?)),
            MARK_ATTR_INT => {
                let bytes = self.read_slice(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(AttrValue::Int(i64::from_be_bytes(buf)))
            }
            marker => Err(DecodeError::UnknownMarker { marker, offset }),
        }
    }

    fn read_node(&mut self) -> Result<Node, DecodeError> {
        let tag = self.read_string()?;
        let attr_count = self.read_byte()?;
        let mut node = Node::new(tag);
        for _ in 0..attr_count {
            let key = self.read_string()?;
            let value = self.read_attr_value()?;
            node.attrs.insert(key, value);
        }
        let offset = self.index;
        match self.read_byte()? {
            MARK_EMPTY => {}
            MARK_CHILDREN => {
                let count = self.read_u16()? as usize;
                let mut children = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    children.push(self.read_node()?);
                }
                node.content = NodeContent::Children(children);
            }
            MARK_BINARY => {
                let len = self.read_u32()? as usize;
                node.content = NodeContent::Bytes(self.read_slice(len)?.to_vec());
            }
            marker => return Err(DecodeError::UnknownMarker { marker, offset }),
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::super::encoder::marshal;
    use super::*;

    #[test]
    fn roundtrip_nested_node() {
        let mut ping = Node::new("ping");
        ping.set_attr("count", 3i64);
        let mut iq = Node::new("iq");
        iq.set_attr("id", "ab12-7");
        iq.set_attr("type", "get");
        iq.set_attr("to", JID::new("", "s.whatsapp.net"));
        iq.add_child(ping);

        let decoded = unmarshal(&marshal(&iq)).unwrap();
        assert_eq!(decoded, iq);
    }

    #[test]
    fn roundtrip_binary_content() {
        let mut node = Node::new("enc");
        node.set_attr("v", "2");
        node.set_bytes(vec![0, 1, 2, 250, 251, 252]);

        let decoded = unmarshal(&marshal(&node)).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn roundtrip_long_untokenized_string() {
        let mut node = Node::new("vcard");
        node.set_attr("payload", "x".repeat(4000));
        let decoded = unmarshal(&marshal(&node)).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn truncated_input_fails() {
        let mut node = Node::new("message");
        node.set_attr("id", "3EB0");
        let encoded = marshal(&node);
        assert!(matches!(
            unmarshal(&encoded[..encoded.len() - 1]),
            Err(DecodeError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn leftover_bytes_fail() {
        let mut encoded = marshal(&Node::new("ack"));
        encoded.push(0xAA);
        assert!(matches!(
            unmarshal(&encoded),
            Err(DecodeError::LeftoverData(1))
        ));
    }
}
