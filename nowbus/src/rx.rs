//! Receive dispatcher.
//!
//! Runs for every frame the radio hands up: validate and authenticate,
//! locate or create the peer, de-duplicate, then hand off to the
//! type-specific handler. The dispatcher never blocks; every reply it
//! generates (acks, pongs, join acks) goes through the non-blocking
//! enqueue path and is simply dropped if the queue is full.

use crate::config::Capacities;
use crate::debug::DebugEvent;
use crate::queue::Dest;
use crate::time::Timestamp;
use crate::traits::{Clock, Crypto, Radio, Random};
use crate::types::{
    AppAck, Heartbeat, HeartbeatKind, JoinAck, JoinReq, Leave, Mac, PacketType, SendTimeout,
    APP_ACK_LEN, BROADCAST_MAC, HEARTBEAT_LEN, JOIN_ACK_LEN, NONCE_LEN,
};
use crate::wire::{parse_frame, Decode, Encode, FrameError, FrameView};
use crate::Bus;

impl<R, C, Rng, Clk, Cap> Bus<R, C, Rng, Clk, Cap>
where
    R: Radio,
    C: Crypto,
    Rng: Random,
    Clk: Clock,
    Cap: Capacities,
{
    /// Dispatch one received frame.
    pub fn handle_rx(&mut self, mac: &Mac, data: &[u8], now: Timestamp) {
        self.metrics.rx_frames = self.metrics.rx_frames.wrapping_add(1);

        let frame = match parse_frame(data, &self.keys, &self.crypto) {
            Ok(frame) => frame,
            Err(reason) => {
                if matches!(reason, FrameError::BadTag | FrameError::GroupMismatch) {
                    self.metrics.rx_auth_failures += 1;
                }
                self.emit_debug(DebugEvent::FrameRejected { mac: *mac, reason });
                return;
            }
        };

        match frame.pkt_type {
            PacketType::DataUnicast => self.on_data_unicast(mac, &frame, now),
            PacketType::DataBroadcast => self.on_data_broadcast(mac, &frame, now),
            PacketType::JoinReq => self.on_join_req(mac, frame.payload, now),
            PacketType::JoinAck => self.on_join_ack(mac, frame.payload, now),
            PacketType::Heartbeat => self.on_heartbeat(mac, frame.payload, now),
            PacketType::AppAck => self.handle_app_ack(mac, frame.payload, now),
            PacketType::Leave => self.on_leave(mac, frame.payload, now),
        }
    }

    fn on_data_unicast(&mut self, mac: &Mac, frame: &FrameView<'_>, now: Timestamp) {
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }
        let duplicate = {
            let Some(peer) = self.peers.find_mut(mac) else {
                return;
            };
            peer.touch(now);
            let duplicate = peer.last_msg_id == Some(frame.id);
            if !duplicate {
                peer.last_msg_id = Some(frame.id);
            }
            duplicate
        };

        // The ack goes out even for a duplicate, so a sender whose ack was
        // lost stops retrying. The sender cannot distinguish delivery from
        // redelivery; that ambiguity is the accepted cost.
        if self.config.enable_app_ack {
            let ack = AppAck { msg_id: frame.id };
            let mut buf = [0u8; APP_ACK_LEN];
            let len = ack.encode_into(&mut buf);
            let _ = self.enqueue_common(
                Dest::Unicast,
                PacketType::AppAck,
                mac,
                &buf[..len],
                SendTimeout::Default,
            );
        }

        if duplicate {
            self.metrics.rx_duplicates += 1;
            self.emit_debug(DebugEvent::DuplicateUnicast {
                mac: *mac,
                msg_id: frame.id,
            });
            return;
        }
        if let Some(cb) = self.receive_cb.as_mut() {
            cb(mac, frame.payload, frame.is_retry, false);
        }
    }

    fn on_data_broadcast(&mut self, mac: &Mac, frame: &FrameView<'_>, now: Timestamp) {
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }
        if let Some(peer) = self.peers.find_mut(mac) {
            peer.touch(now);
        }
        if !self
            .senders
            .accept(mac, frame.id, self.config.replay_window, now)
        {
            self.metrics.rx_replay_drops += 1;
            self.emit_debug(DebugEvent::ReplayDrop {
                mac: *mac,
                seq: frame.id,
            });
            return;
        }
        if let Some(cb) = self.receive_cb.as_mut() {
            cb(mac, frame.payload, frame.is_retry, true);
        }
    }

    fn on_join_req(&mut self, mac: &Mac, payload: &[u8], now: Timestamp) {
        let Ok(req) = JoinReq::decode_from_slice(payload) else {
            self.emit_debug(DebugEvent::FrameRejected {
                mac: *mac,
                reason: FrameError::BadPayload,
            });
            return;
        };
        // Only answer requests addressed to everyone or to us.
        if req.target_mac != BROADCAST_MAC && req.target_mac != self.self_mac {
            return;
        }
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }

        let mut nonce_b = [0u8; NONCE_LEN];
        self.random.fill_bytes(&mut nonce_b);

        let resumed = {
            let Some(peer) = self.peers.find_mut(mac) else {
                return;
            };
            peer.touch(now);
            let resumed =
                req.prev_token != [0u8; NONCE_LEN] && peer.last_nonce_b == Some(req.prev_token);
            peer.last_nonce_b = Some(nonce_b);
            resumed
        };
        self.emit_debug(DebugEvent::JoinReqReceived {
            mac: *mac,
            resumed,
        });

        let ack = JoinAck {
            nonce_a: req.nonce_a,
            nonce_b,
            target_mac: *mac,
        };
        let mut buf = [0u8; JOIN_ACK_LEN];
        let len = ack.encode_into(&mut buf);
        let _ = self.enqueue_common(
            Dest::Broadcast,
            PacketType::JoinAck,
            &BROADCAST_MAC,
            &buf[..len],
            SendTimeout::Default,
        );
        self.fire_join_event(mac, true, false);
    }

    fn on_join_ack(&mut self, mac: &Mac, payload: &[u8], now: Timestamp) {
        if !self.pending_join {
            self.emit_debug(DebugEvent::UnsolicitedJoinAck { mac: *mac });
            return;
        }
        let Ok(ack) = JoinAck::decode_from_slice(payload) else {
            return;
        };
        if ack.target_mac != self.self_mac {
            return;
        }
        // Freshness gate: reject before any state is touched, so a stale
        // or forged ack cannot disturb the peer table.
        if ack.nonce_a != self.pending_nonce_a {
            self.emit_debug(DebugEvent::JoinNonceMismatch { mac: *mac });
            self.fire_join_event(mac, false, true);
            return;
        }
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }
        if let Some(peer) = self.peers.find_mut(mac) {
            peer.last_nonce_b = Some(ack.nonce_b);
            peer.touch(now);
        }
        self.stored_nonce_b = Some(ack.nonce_b);
        self.pending_join = false;
        self.emit_debug(DebugEvent::JoinAccepted { mac: *mac });
        self.fire_join_event(mac, true, true);
    }

    fn handle_app_ack(&mut self, mac: &Mac, payload: &[u8], now: Timestamp) {
        let Ok(ack) = AppAck::decode_from_slice(payload) else {
            return;
        };
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }
        let replayed = {
            let Some(peer) = self.peers.find_mut(mac) else {
                return;
            };
            if peer.last_app_ack_id == Some(ack.msg_id) {
                true
            } else {
                peer.last_app_ack_id = Some(ack.msg_id);
                peer.touch(now);
                false
            }
        };
        if replayed {
            self.emit_debug(DebugEvent::DuplicateAppAck {
                mac: *mac,
                msg_id: ack.msg_id,
            });
            return;
        }
        self.handle_matching_app_ack(ack.msg_id);
        if let Some(cb) = self.app_ack_cb.as_mut() {
            cb(mac, ack.msg_id);
        }
    }

    fn on_heartbeat(&mut self, mac: &Mac, payload: &[u8], now: Timestamp) {
        let Ok(hb) = Heartbeat::decode_from_slice(payload) else {
            return;
        };
        if !self.ensure_peer(mac, now) {
            self.emit_debug(DebugEvent::PeerTableFull { mac: *mac });
            return;
        }
        if let Some(peer) = self.peers.find_mut(mac) {
            peer.touch(now);
        }
        if hb.kind == HeartbeatKind::Ping {
            let pong = Heartbeat {
                kind: HeartbeatKind::Pong,
            };
            let mut buf = [0u8; HEARTBEAT_LEN];
            let len = pong.encode_into(&mut buf);
            let _ = self.enqueue_common(
                Dest::Unicast,
                PacketType::Heartbeat,
                mac,
                &buf[..len],
                SendTimeout::Default,
            );
        }
    }

    fn on_leave(&mut self, mac: &Mac, payload: &[u8], _now: Timestamp) {
        let Ok(leave) = Leave::decode_from_slice(payload) else {
            return;
        };
        // A leave must come from an already-known peer and name its own
        // sender; anything else is a protocol error.
        if self.peers.find(mac).is_none() {
            return;
        }
        if leave.mac != *mac {
            self.emit_debug(DebugEvent::LeaveMismatch { mac: *mac });
            return;
        }
        self.fire_join_event(mac, false, false);
        self.remove_peer(mac);
    }
}
