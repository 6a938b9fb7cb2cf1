//! Core protocol types and wire constants.

use crate::wire::{Decode, Encode, FrameError, Reader, Writer};

/// 6-byte radio hardware address.
pub type Mac = [u8; 6];

/// The all-ones broadcast address.
pub const BROADCAST_MAC: Mac = [0xFF; 6];

/// First byte of every frame.
pub const MAGIC: u8 = 0xEB;

/// Protocol version carried in every frame.
pub const VERSION: u8 = 1;

/// Fixed header: magic, version, type, flags, 16-bit id.
pub const HEADER_LEN: usize = 6;

/// Group-id field length (authenticated frames only).
pub const GROUP_ID_LEN: usize = 4;

/// Truncated HMAC-SHA-256 tag length.
pub const AUTH_TAG_LEN: usize = 16;

/// Handshake nonce length.
pub const NONCE_LEN: usize = 8;

/// Smallest usable frame capacity: header plus the group-id field.
pub const MIN_FRAME_CAPACITY: usize = HEADER_LEN + GROUP_ID_LEN;

/// Flags bit 0: this frame is a retransmission. Remaining bits are reserved
/// and must be zero.
pub const FLAG_RETRY: u8 = 0x01;

/// Largest sliding replay window the 32-bit bitmap can represent.
pub const MAX_REPLAY_WINDOW: u16 = 32;

/// Frame types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    /// Application payload to a single peer.
    DataUnicast = 1,
    /// Application payload to the whole group.
    DataBroadcast = 2,
    /// Group-join request (broadcast, target selected in the payload).
    JoinReq = 3,
    /// Group-join response.
    JoinAck = 4,
    /// Liveness ping/pong.
    Heartbeat = 5,
    /// Application-level acknowledgement of a unicast.
    AppAck = 6,
    /// Graceful group departure.
    Leave = 7,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(PacketType::DataUnicast),
            2 => Some(PacketType::DataBroadcast),
            3 => Some(PacketType::JoinReq),
            4 => Some(PacketType::JoinAck),
            5 => Some(PacketType::Heartbeat),
            6 => Some(PacketType::AppAck),
            7 => Some(PacketType::Leave),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether frames of this type carry a group id and an auth tag.
    /// Unicast data relies on link-layer encryption instead.
    pub fn is_authenticated(self) -> bool {
        !matches!(self, PacketType::DataUnicast)
    }

    /// Whether the header id field carries the broadcast sequence counter
    /// rather than the unicast message counter.
    pub fn uses_seq(self) -> bool {
        matches!(
            self,
            PacketType::DataBroadcast | PacketType::JoinReq | PacketType::JoinAck
        )
    }
}

/// Outcome of a send operation, reported through the send-result callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    /// Accepted into the transmit queue.
    Queued,
    /// Physical send succeeded and no application ack was required.
    SentOk,
    /// Physical send failed or timed out; a retry has been issued.
    Retrying,
    /// Retries exhausted after a driver-reported failure.
    SendFailed,
    /// Retries exhausted after the physical deadline expired.
    Timeout,
    /// Transmit queue full, frame not accepted.
    DroppedFull,
    /// Framed size would exceed the MTU.
    TooLarge,
    /// A matching application-level ack arrived.
    AppAckReceived,
    /// The application-level ack deadline expired after all retries.
    AppAckTimeout,
}

/// How long a producer is willing to wait for queue space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendTimeout {
    /// Use the configured default send timeout.
    #[default]
    Default,
    /// Wait without bound.
    Forever,
    /// Wait up to this many milliseconds.
    Millis(u32),
}

/// Heartbeat payload discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HeartbeatKind {
    Ping = 0,
    Pong = 1,
}

/// JoinReq payload: nonceA, continuity token, addressed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinReq {
    pub nonce_a: [u8; NONCE_LEN],
    /// Responder nonce from the previous successful join, zeroes if none.
    pub prev_token: [u8; NONCE_LEN],
    /// Broadcast address means "any member may answer".
    pub target_mac: Mac,
}

/// JoinAck payload: echoed nonceA, fresh nonceB, the requester's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    pub nonce_a: [u8; NONCE_LEN],
    pub nonce_b: [u8; NONCE_LEN],
    pub target_mac: Mac,
}

/// AppAck payload: the acknowledged unicast message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppAck {
    pub msg_id: u16,
}

/// Heartbeat payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub kind: HeartbeatKind,
}

/// Leave payload: the departing node's own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leave {
    pub mac: Mac,
}

pub const JOIN_REQ_LEN: usize = NONCE_LEN * 2 + 6;
pub const JOIN_ACK_LEN: usize = NONCE_LEN * 2 + 6;
pub const APP_ACK_LEN: usize = 2;
pub const HEARTBEAT_LEN: usize = 1;
pub const LEAVE_LEN: usize = 6;

/// Largest control payload; used to size stack scratch buffers.
pub const MAX_CONTROL_PAYLOAD: usize = JOIN_REQ_LEN;

impl Encode for JoinReq {
    fn encoded_len(&self) -> usize {
        JOIN_REQ_LEN
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.write_bytes(&self.nonce_a);
        w.write_bytes(&self.prev_token);
        w.write_mac(&self.target_mac);
    }
}

impl Decode for JoinReq {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        Ok(JoinReq {
            nonce_a: r.read_nonce()?,
            prev_token: r.read_nonce()?,
            target_mac: r.read_mac()?,
        })
    }
}

impl Encode for JoinAck {
    fn encoded_len(&self) -> usize {
        JOIN_ACK_LEN
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.write_bytes(&self.nonce_a);
        w.write_bytes(&self.nonce_b);
        w.write_mac(&self.target_mac);
    }
}

impl Decode for JoinAck {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        Ok(JoinAck {
            nonce_a: r.read_nonce()?,
            nonce_b: r.read_nonce()?,
            target_mac: r.read_mac()?,
        })
    }
}

impl Encode for AppAck {
    fn encoded_len(&self) -> usize {
        APP_ACK_LEN
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.write_u16_le(self.msg_id);
    }
}

impl Decode for AppAck {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        Ok(AppAck {
            msg_id: r.read_u16_le()?,
        })
    }
}

impl Encode for Heartbeat {
    fn encoded_len(&self) -> usize {
        HEARTBEAT_LEN
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.write_u8(self.kind as u8);
    }
}

impl Decode for Heartbeat {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        let kind = match r.read_u8()? {
            0 => HeartbeatKind::Ping,
            1 => HeartbeatKind::Pong,
            _ => return Err(FrameError::BadPayload),
        };
        Ok(Heartbeat { kind })
    }
}

impl Encode for Leave {
    fn encoded_len(&self) -> usize {
        LEAVE_LEN
    }

    fn encode(&self, w: &mut Writer<'_>) {
        w.write_mac(&self.mac);
    }
}

impl Decode for Leave {
    fn decode(r: &mut Reader<'_>) -> Result<Self, FrameError> {
        Ok(Leave {
            mac: r.read_mac()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_roundtrip() {
        for raw in 1u8..=7 {
            let ty = PacketType::from_u8(raw).unwrap();
            assert_eq!(ty.as_u8(), raw);
        }
        assert_eq!(PacketType::from_u8(0), None);
        assert_eq!(PacketType::from_u8(8), None);
    }

    #[test]
    fn authenticated_set() {
        assert!(!PacketType::DataUnicast.is_authenticated());
        for ty in [
            PacketType::DataBroadcast,
            PacketType::JoinReq,
            PacketType::JoinAck,
            PacketType::Heartbeat,
            PacketType::AppAck,
            PacketType::Leave,
        ] {
            assert!(ty.is_authenticated(), "{ty:?} must carry a tag");
        }
    }

    #[test]
    fn seq_vs_msg_id_split() {
        assert!(PacketType::DataBroadcast.uses_seq());
        assert!(PacketType::JoinReq.uses_seq());
        assert!(PacketType::JoinAck.uses_seq());
        assert!(!PacketType::DataUnicast.uses_seq());
        assert!(!PacketType::Heartbeat.uses_seq());
        assert!(!PacketType::AppAck.uses_seq());
        assert!(!PacketType::Leave.uses_seq());
    }

    #[test]
    fn payload_codec_roundtrips() {
        let req = JoinReq {
            nonce_a: [1; 8],
            prev_token: [2; 8],
            target_mac: [3; 6],
        };
        let mut buf = [0u8; JOIN_REQ_LEN];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w);
        assert_eq!(w.written(), JOIN_REQ_LEN);
        let decoded = JoinReq::decode(&mut Reader::new(&buf)).unwrap();
        assert_eq!(decoded, req);

        let ack = AppAck { msg_id: 0xBEEF };
        let mut buf = [0u8; APP_ACK_LEN];
        let mut w = Writer::new(&mut buf);
        ack.encode(&mut w);
        assert_eq!(buf, [0xEF, 0xBE]);
        assert_eq!(AppAck::decode(&mut Reader::new(&buf)).unwrap(), ack);
    }

    #[test]
    fn heartbeat_rejects_unknown_kind() {
        let buf = [2u8];
        assert!(matches!(
            Heartbeat::decode(&mut Reader::new(&buf)),
            Err(FrameError::BadPayload)
        ));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let buf = [0u8; JOIN_ACK_LEN - 1];
        assert!(JoinAck::decode(&mut Reader::new(&buf)).is_err());
    }
}
