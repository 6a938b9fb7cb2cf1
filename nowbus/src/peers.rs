//! Fixed-capacity peer table.
//!
//! Lookup is a linear scan over at most a few dozen slots, which beats any
//! hashing scheme at this size and keeps the memory bound exact. Slots are
//! allocated on first contact and recycled on removal; a peer that returns
//! after eviction starts with clean replay state.

use alloc::vec::Vec;

use crate::time::Timestamp;
use crate::types::{Mac, NONCE_LEN};

/// Per-peer protocol state.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub mac: Mac,
    /// Last accepted unicast message id, for duplicate suppression.
    pub last_msg_id: Option<u16>,
    /// Responder nonce from the most recent successful handshake.
    pub last_nonce_b: Option<[u8; NONCE_LEN]>,
    /// Last accepted app-ack id, for ack replay suppression.
    pub last_app_ack_id: Option<u16>,
    /// When we last heard anything from this peer.
    pub last_seen: Timestamp,
    /// Liveness escalation progress: 0 fresh, 1 pinged, 2 re-join sent.
    pub heartbeat_stage: u8,
}

impl PeerInfo {
    fn new(mac: Mac, now: Timestamp) -> Self {
        PeerInfo {
            mac,
            last_msg_id: None,
            last_nonce_b: None,
            last_app_ack_id: None,
            last_seen: now,
            heartbeat_stage: 0,
        }
    }

    /// Record traffic from this peer, resetting the liveness ladder.
    pub fn touch(&mut self, now: Timestamp) {
        self.last_seen = now;
        self.heartbeat_stage = 0;
    }
}

/// Bounded peer set.
pub struct PeerTable {
    slots: Vec<Option<PeerInfo>>,
}

impl PeerTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        PeerTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn find(&self, mac: &Mac) -> Option<&PeerInfo> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .find(|p| &p.mac == mac)
    }

    pub fn find_mut(&mut self, mac: &Mac) -> Option<&mut PeerInfo> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .find(|p| &p.mac == mac)
    }

    /// Allocate a fresh slot for `mac` with cleared state. Returns false
    /// when the peer already exists or the table is full.
    pub fn insert(&mut self, mac: &Mac, now: Timestamp) -> bool {
        if self.find(mac).is_some() {
            return false;
        }
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(PeerInfo::new(*mac, now));
                true
            }
            None => false,
        }
    }

    /// Find `mac` or allocate a cleared slot for it. `None` means the
    /// table is full and the caller must drop the frame.
    pub fn ensure(&mut self, mac: &Mac, now: Timestamp) -> Option<&mut PeerInfo> {
        if self.find(mac).is_none() && !self.insert(mac, now) {
            return None;
        }
        self.find_mut(mac)
    }

    pub fn remove(&mut self, mac: &Mac) -> bool {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|p| &p.mac == mac) {
                *slot = None;
                return true;
            }
        }
        false
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The `index`-th occupied slot, in slot order.
    pub fn mac_at(&self, index: usize) -> Option<Mac> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref())
            .nth(index)
            .map(|p| p.mac)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerInfo> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}
