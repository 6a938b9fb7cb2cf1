//! Protocol trace events.
//!
//! Enabled with the `debug` feature. The bus pushes structured events into
//! a bounded channel at every point the engine makes a drop/retry/eviction
//! decision; the simulator and tests consume them to assert on behavior
//! that is otherwise invisible (silent drops in particular).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{Mac, SendStatus};
use crate::wire::FrameError;

/// Depth of the trace event channel. Overflow silently drops events.
pub const DEBUG_QUEUE_DEPTH: usize = 32;

/// Channel the bus emits trace events into.
pub type DebugChannel = Channel<CriticalSectionRawMutex, DebugEvent, DEBUG_QUEUE_DEPTH>;

/// Trace events emitted by the protocol engine.
#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// Startup finished; channel and clipped payload size resolved.
    Started { channel: u8, max_payload: u16 },
    /// Configured payload size exceeded the radio MTU and was clipped.
    PayloadClipped { requested: u16, clipped: u16 },
    /// Channel derived from the group id.
    AutoChannel { channel: u8 },
    /// Incoming frame failed validation and was dropped.
    FrameRejected { mac: Mac, reason: FrameError },
    /// Broadcast sequence rejected by the replay window.
    ReplayDrop { mac: Mac, seq: u16 },
    /// Unicast with an already-seen message id; callback suppressed.
    DuplicateUnicast { mac: Mac, msg_id: u16 },
    /// App-ack with an already-seen id; dropped.
    DuplicateAppAck { mac: Mac, msg_id: u16 },
    /// Peer table full; frame from an unknown source dropped.
    PeerTableFull { mac: Mac },
    /// Join request observed (and answered when addressed to us).
    JoinReqReceived { mac: Mac, resumed: bool },
    /// Join ack accepted; handshake complete.
    JoinAccepted { mac: Mac },
    /// Join ack carried the wrong nonce; discarded.
    JoinNonceMismatch { mac: Mac },
    /// Join ack arrived with no join pending.
    UnsolicitedJoinAck { mac: Mac },
    /// Leave frame failed its source check.
    LeaveMismatch { mac: Mac },
    /// Peer evicted after three silent heartbeat intervals.
    PeerTimeout { mac: Mac, last_seen: Timestamp },
    /// A transmission was retried.
    SendRetry { mac: Mac, attempt: u8 },
    /// A transmission retired with a terminal status.
    SendRetired { mac: Mac, status: SendStatus },
    /// Producer enqueue rejected.
    EnqueueRejected { mac: Mac, status: SendStatus },
    /// Wire counters reseeded.
    CounterReseed,
}
