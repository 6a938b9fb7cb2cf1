//! Bus traffic counters.

/// Monotonic counters for monitoring, split by transmit outcome and
/// receive-side drop reason. Cheap enough to keep unconditionally.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusMetrics {
    pub queued: u32,
    pub sent_ok: u32,
    pub send_failed: u32,
    pub send_timeouts: u32,
    pub retries: u32,
    pub app_acks_received: u32,
    pub app_ack_timeouts: u32,
    pub dropped_full: u32,
    pub too_large: u32,
    pub rx_frames: u32,
    pub rx_auth_failures: u32,
    pub rx_replay_drops: u32,
    pub rx_duplicates: u32,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }
}
