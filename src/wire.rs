//! Wire Codec (spec.md §4.C, §6).
//!
//! Wire format, one datagram per message:
//!
//! ```text
//! offset  size  field
//! 0       8     seq   (big-endian uint64)
//! 8       8     rnd   (big-endian uint64)
//! 16      1     op    (uint8 opcode)
//! 17      8     len   (big-endian uint64)   [packed, no padding]
//! 25      len   payload
//! ```
//!
//! Grounded in `server/lib/neutronium/src/net/frame.rs`'s manual
//! byteorder-based read/write of its own fixed header, adapted to this
//! crate's field set and its one defined opcode.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Size in bytes of the encoded header, before the payload.
pub const HEADER_LEN: usize = 8 + 8 + 1 + 8;

/// Default maximum datagram size, matching the historical Ethernet MTU the
/// original implementation assumed.
pub const MAX_DATAGRAM_LEN: usize = 1500;

/// Largest payload that fits under `MAX_DATAGRAM_LEN` once the header is
/// accounted for.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_LEN - HEADER_LEN;

/// The message opcode. Only `Set` is defined on the wire today; `Unknown`
/// preserves forward-compatible decode of opcodes this build doesn't know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Set,
    Unknown(u8),
}

impl Opcode {
    const OP_SET: u8 = 1;

    fn from_byte(byte: u8) -> Opcode {
        match byte {
            Self::OP_SET => Opcode::Set,
            other => Opcode::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Opcode::Set => Self::OP_SET,
            Opcode::Unknown(byte) => byte,
        }
    }
}

/// A decoded/to-be-encoded header. `len` is the payload length, not
/// including the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u64,
    pub rnd: u64,
    pub op: Opcode,
    pub len: u64,
}

impl Header {
    /// Encodes this header in network byte order into `out`, which must be
    /// at least `HEADER_LEN` bytes long.
    pub fn encode(&self, out: &mut [u8]) {
        assert!(out.len() >= HEADER_LEN, "header buffer too small");
        BigEndian::write_u64(&mut out[0..8], self.seq);
        BigEndian::write_u64(&mut out[8..16], self.rnd);
        out[16] = self.op.to_byte();
        BigEndian::write_u64(&mut out[17..25], self.len);
    }

    /// Decodes a header from the front of `buf`, converting all multi-byte
    /// fields from network to host order in one pass. Fails with
    /// `Error::Receive` if `buf` is shorter than `HEADER_LEN`.
    pub fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Receive(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "datagram shorter than header",
            )));
        }
        let seq = BigEndian::read_u64(&buf[0..8]);
        let rnd = BigEndian::read_u64(&buf[8..16]);
        let op = Opcode::from_byte(buf[16]);
        let len = BigEndian::read_u64(&buf[17..25]);
        Ok(Header { seq, rnd, op, len })
    }
}

/// Encodes a full `[header || payload]` datagram.
pub fn encode_message(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_LEN + payload.len()];
    header.encode(&mut out[..HEADER_LEN]);
    out[HEADER_LEN..].copy_from_slice(payload);
    out
}

/// Decodes a received datagram into its header and payload slice.
///
/// The receiver must never trust `len` past what the datagram actually
/// delivered: if the header claims more payload than remains in `datagram`,
/// the message is dropped (`Error::Receive`) rather than read out of bounds.
pub fn decode_message(datagram: &[u8]) -> Result<(Header, &[u8])> {
    let header = Header::decode(datagram)?;
    let body = &datagram[HEADER_LEN..];
    if header.len as usize > body.len() {
        return Err(Error::Receive(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "header length exceeds delivered datagram bytes",
        )));
    }
    Ok((header, &body[..header.len as usize]))
}

/// Frames a `SET` payload as `keylen (big-endian u64) || key || value`, per
/// the SET payload framing in spec.md §6.
pub fn encode_set_payload(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 8 + key.len() + value.len()];
    BigEndian::write_u64(&mut out[0..8], key.len() as u64);
    out[8..8 + key.len()].copy_from_slice(key);
    out[8 + key.len()..].copy_from_slice(value);
    out
}

/// Splits a `SET` payload back into `(key, value)`. Value length is
/// inferred as `payload.len() - 8 - keylen`.
pub fn decode_set_payload(payload: &[u8]) -> Result<(&[u8], &[u8])> {
    if payload.len() < 8 {
        return Err(Error::Receive(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "SET payload shorter than keylen field",
        )));
    }
    let keylen = BigEndian::read_u64(&payload[0..8]) as usize;
    let rest = &payload[8..];
    if keylen > rest.len() {
        return Err(Error::Receive(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "SET payload keylen exceeds remaining bytes",
        )));
    }
    Ok((&rest[..keylen], &rest[keylen..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            seq: 42,
            rnd: 0xdead_beef_cafe_babe,
            op: Opcode::Set,
            len: 7,
        };
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_is_big_endian_on_the_wire() {
        let header = Header {
            seq: 1,
            rnd: 0,
            op: Opcode::Set,
            len: 0,
        };
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);
        assert_eq!(&buf[0..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(buf[16], 1);
    }

    #[test]
    fn decode_message_splits_header_and_payload() {
        let header = Header {
            seq: 1,
            rnd: 2,
            op: Opcode::Set,
            len: 3,
        };
        let datagram = encode_message(&header, b"abc");
        let (decoded, body) = decode_message(&datagram).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(body, b"abc");
    }

    #[test]
    fn drops_message_whose_len_exceeds_delivered_bytes() {
        let header = Header {
            seq: 1,
            rnd: 2,
            op: Opcode::Set,
            len: 100,
        };
        let mut datagram = vec![0u8; HEADER_LEN];
        header.encode(&mut datagram);
        assert!(decode_message(&datagram).is_err());
    }

    #[test]
    fn set_payload_roundtrip() {
        let payload = encode_set_payload(b"key", b"value");
        let (key, value) = decode_set_payload(&payload).unwrap();
        assert_eq!(key, b"key");
        assert_eq!(value, b"value");
    }

    #[test]
    fn unknown_opcode_is_preserved() {
        let mut buf = [0u8; HEADER_LEN];
        let header = Header {
            seq: 0,
            rnd: 0,
            op: Opcode::Unknown(0xaa),
            len: 0,
        };
        header.encode(&mut buf);
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.op, Opcode::Unknown(0xaa));
    }
}
