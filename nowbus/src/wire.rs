//! Frame codec.
//!
//! Wire layout, little-endian throughout:
//!
//! ```text
//! offset  size  field
//!      0     1  magic = 0xEB
//!      1     1  version = 1
//!      2     1  packet type
//!      3     1  flags (bit 0 = retry, rest reserved zero)
//!      4     2  id: msgId or seq depending on type
//!      6     4  group id            -- authenticated types only
//!   6|10     N  payload
//!    ..     16  truncated HMAC-SHA-256 tag -- authenticated types only
//! ```
//!
//! The tag covers everything before it (header, group id, payload), so a
//! retransmission that sets the retry flag must recompute it.

use crate::keys::DerivedKeys;
use crate::traits::Crypto;
use crate::types::{
    Mac, PacketType, AUTH_TAG_LEN, FLAG_RETRY, GROUP_ID_LEN, HEADER_LEN, MAGIC, NONCE_LEN, VERSION,
};

/// Frame decode/verify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// Shorter than the minimum for its shape.
    TooShort,
    /// First byte is not the protocol magic.
    BadMagic,
    /// Unsupported protocol version.
    BadVersion,
    /// Packet type byte outside the known range.
    UnknownType(u8),
    /// Group-id field does not match this bus's group.
    GroupMismatch,
    /// Authentication tag failed to verify.
    BadTag,
    /// Typed payload malformed.
    BadPayload,
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame too short"),
            FrameError::BadMagic => write!(f, "bad magic byte"),
            FrameError::BadVersion => write!(f, "unsupported version"),
            FrameError::UnknownType(t) => write!(f, "unknown packet type {t}"),
            FrameError::GroupMismatch => write!(f, "group id mismatch"),
            FrameError::BadTag => write!(f, "auth tag mismatch"),
            FrameError::BadPayload => write!(f, "malformed payload"),
        }
    }
}

/// Cursor over an immutable byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        if self.pos >= self.buf.len() {
            return Err(FrameError::TooShort);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < len {
            return Err(FrameError::TooShort);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, FrameError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, FrameError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_mac(&mut self) -> Result<Mac, FrameError> {
        let b = self.read_bytes(6)?;
        let mut mac = [0u8; 6];
        mac.copy_from_slice(b);
        Ok(mac)
    }

    pub fn read_nonce(&mut self) -> Result<[u8; NONCE_LEN], FrameError> {
        let b = self.read_bytes(NONCE_LEN)?;
        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(b);
        Ok(n)
    }
}

/// Cursor over a mutable byte slice. Callers size the buffer from
/// [`Encode::encoded_len`]; writing past the end is a bug, not an error.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    pub fn write_u16_le(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_mac(&mut self, mac: &Mac) {
        self.write_bytes(mac);
    }
}

/// Types with a fixed wire encoding.
pub trait Encode {
    /// Exact encoded size in bytes.
    fn encoded_len(&self) -> usize;

    /// Write the encoding to `w`.
    fn encode(&self, w: &mut Writer<'_>);

    /// Encode into the front of `buf`, returning the encoded length.
    fn encode_into(&self, buf: &mut [u8]) -> usize {
        let mut w = Writer::new(buf);
        self.encode(&mut w);
        w.written()
    }
}

/// Types decodable from the wire.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError>;

    fn decode_from_slice(data: &[u8]) -> Result<Self, FrameError> {
        Self::decode(&mut Reader::new(data))
    }
}

/// Total on-air overhead for a packet type.
pub fn frame_overhead(pkt_type: PacketType) -> usize {
    if pkt_type.is_authenticated() {
        HEADER_LEN + GROUP_ID_LEN + AUTH_TAG_LEN
    } else {
        HEADER_LEN
    }
}

/// A validated incoming frame, borrowing the receive buffer.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub pkt_type: PacketType,
    pub is_retry: bool,
    pub id: u16,
    pub payload: &'a [u8],
}

/// Build a complete frame into `buf` and return its length.
///
/// `buf` must hold at least `frame_overhead(pkt_type) + payload.len()`
/// bytes; the transmit path checks this against the MTU before allocating.
pub fn write_frame<C: Crypto>(
    buf: &mut [u8],
    pkt_type: PacketType,
    id: u16,
    payload: &[u8],
    keys: &DerivedKeys,
    crypto: &C,
) -> usize {
    let mut w = Writer::new(buf);
    w.write_u8(MAGIC);
    w.write_u8(VERSION);
    w.write_u8(pkt_type.as_u8());
    w.write_u8(0); // flags; retry bit set on retransmission
    w.write_u16_le(id);
    if pkt_type.is_authenticated() {
        w.write_u32_le(keys.group_id);
        w.write_bytes(payload);
        let tag_offset = w.written();
        let tag = crypto.hmac_sha256(keys.key_for(pkt_type), &buf[..tag_offset]);
        buf[tag_offset..tag_offset + AUTH_TAG_LEN].copy_from_slice(&tag[..AUTH_TAG_LEN]);
        tag_offset + AUTH_TAG_LEN
    } else {
        w.write_bytes(payload);
        w.written()
    }
}

/// Recompute the tag of an already-framed buffer after a header mutation
/// (the retry flag is inside the tag input). No-op for unauthenticated
/// types or impossibly short frames.
pub fn refresh_tag<C: Crypto>(
    frame: &mut [u8],
    pkt_type: PacketType,
    keys: &DerivedKeys,
    crypto: &C,
) {
    if !pkt_type.is_authenticated() || frame.len() < frame_overhead(pkt_type) {
        return;
    }
    let tag_offset = frame.len() - AUTH_TAG_LEN;
    let tag = crypto.hmac_sha256(keys.key_for(pkt_type), &frame[..tag_offset]);
    frame[tag_offset..].copy_from_slice(&tag[..AUTH_TAG_LEN]);
}

/// Validate an incoming frame: length, magic, version, and for
/// authenticated types the group id and the tag. Returns the typed header
/// and the payload slice.
pub fn parse_frame<'a, C: Crypto>(
    data: &'a [u8],
    keys: &DerivedKeys,
    crypto: &C,
) -> Result<FrameView<'a>, FrameError> {
    if data.len() < HEADER_LEN {
        return Err(FrameError::TooShort);
    }
    if data[0] != MAGIC {
        return Err(FrameError::BadMagic);
    }
    if data[1] != VERSION {
        return Err(FrameError::BadVersion);
    }
    let pkt_type = PacketType::from_u8(data[2]).ok_or(FrameError::UnknownType(data[2]))?;
    let is_retry = data[3] & FLAG_RETRY != 0;
    let id = u16::from_le_bytes([data[4], data[5]]);

    let payload = if pkt_type.is_authenticated() {
        if data.len() < frame_overhead(pkt_type) {
            return Err(FrameError::TooShort);
        }
        let gid = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
        if gid != keys.group_id {
            return Err(FrameError::GroupMismatch);
        }
        let tag_offset = data.len() - AUTH_TAG_LEN;
        let tag = crypto.hmac_sha256(keys.key_for(pkt_type), &data[..tag_offset]);
        if !ct_eq(&tag[..AUTH_TAG_LEN], &data[tag_offset..]) {
            return Err(FrameError::BadTag);
        }
        &data[HEADER_LEN + GROUP_ID_LEN..tag_offset]
    } else {
        &data[HEADER_LEN..]
    };

    Ok(FrameView {
        pkt_type,
        is_retry,
        id,
        payload,
    })
}

/// Constant-time equality for tag comparison.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
