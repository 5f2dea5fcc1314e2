//! Binary XML encoding and decoding.
//!
//! Frames carry a one-byte compression flag followed by the encoded
//! node: flag high bit set means the rest is the raw payload, otherwise
//! the rest is zlib-compressed.

mod decoder;
mod encoder;
mod node;
mod token;

use std::borrow::Cow;
use std::io::Read;

pub use decoder::{unmarshal, DecodeError};
pub use encoder::marshal;
pub use node::{AttrValue, Attrs, Node, NodeContent};
pub use token::{get_token, get_token_index, SINGLE_BYTE_TOKENS};

const FLAG_RAW: u8 = 0x80;

/// Prepends the compression flag to an encoded node. Outbound frames
/// are never compressed.
pub fn pack(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 1);
    framed.push(FLAG_RAW);
    framed.extend_from_slice(payload);
    framed
}

/// Strips the compression flag, inflating the payload when needed.
pub fn unpack(data: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    let (&flag, rest) = data
        .split_first()
        .ok_or(DecodeError::UnexpectedEof(0))?;
    if flag & FLAG_RAW != 0 {
        return Ok(Cow::Borrowed(rest));
    }
    let mut inflated = Vec::with_capacity(rest.len() * 4);
    flate2::read::ZlibDecoder::new(rest)
        .read_to_end(&mut inflated)
        .map_err(|_| DecodeError::Decompress)?;
    Ok(Cow::Owned(inflated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pack_unpack_raw() {
        let node = {
            let mut n = Node::new("presence");
            n.set_attr("type", "available");
            n
        };
        let framed = pack(&marshal(&node));
        assert_eq!(framed[0] & 0x80, 0x80);
        let unpacked = unpack(&framed).unwrap();
        assert_eq!(unmarshal(&unpacked).unwrap(), node);
    }

    #[test]
    fn unpack_zlib() {
        let node = Node::new("success");
        let encoded = marshal(&node);

        let mut framed = vec![0u8];
        let mut enc = flate2::write::ZlibEncoder::new(&mut framed, flate2::Compression::default());
        enc.write_all(&encoded).unwrap();
        enc.finish().unwrap();

        let unpacked = unpack(&framed).unwrap();
        assert_eq!(unmarshal(&unpacked).unwrap(), node);
    }

    #[test]
    fn unpack_empty_fails() {
        assert!(unpack(&[]).is_err());
    }
}
