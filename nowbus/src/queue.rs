//! Bounded transmit queue.

use alloc::collections::VecDeque;

use crate::pool::BufferIndex;
use crate::time::Timestamp;
use crate::types::{Mac, PacketType};

/// Unicast or broadcast delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Unicast,
    Broadcast,
}

/// One queued transmission. Owns its pool buffer from enqueue until the
/// scheduler retires it.
#[derive(Debug, Clone, Copy)]
pub struct TxItem {
    pub buffer: BufferIndex,
    /// Framed length inside the buffer.
    pub len: u16,
    pub msg_id: u16,
    pub seq: u16,
    pub dest: Dest,
    pub pkt_type: PacketType,
    pub is_retry: bool,
    pub mac: Mac,
    /// Wait for a matching application ack before retiring.
    pub expect_ack: bool,
    pub app_ack_deadline: Timestamp,
}

impl TxItem {
    /// The header id this frame was built with.
    pub fn wire_id(&self) -> u16 {
        if self.pkt_type.uses_seq() {
            self.seq
        } else {
            self.msg_id
        }
    }
}

/// FIFO of pending transmissions, bounded to the pool size.
pub struct TxQueue {
    items: VecDeque<TxItem>,
    capacity: usize,
}

impl TxQueue {
    pub fn new(capacity: usize) -> Self {
        TxQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Enqueue, handing the item back on overflow so the caller can
    /// release its buffer.
    pub fn push(&mut self, item: TxItem) -> Result<(), TxItem> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<TxItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn free_slots(&self) -> usize {
        self.capacity - self.items.len()
    }
}
