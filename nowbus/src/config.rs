//! Runtime configuration and compile-time capacity profiles.

use alloc::string::String;

use crate::time::Duration;

/// Radio PHY rate selector, passed through to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyRate(pub u8);

impl PhyRate {
    /// 1 Mbit/s long preamble, the most robust rate.
    pub const MBPS_1_LONG: PhyRate = PhyRate(0x00);
    /// 2 Mbit/s long preamble.
    pub const MBPS_2_LONG: PhyRate = PhyRate(0x01);
    /// 6 Mbit/s OFDM.
    pub const MBPS_6: PhyRate = PhyRate(0x0B);
    /// 24 Mbit/s OFDM.
    pub const MBPS_24: PhyRate = PhyRate(0x09);
}

/// Bus configuration, fixed at [`begin`](crate::Bus::begin) time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Group name; the root of every derived key. Must be non-empty.
    pub group_name: String,
    /// Key the radio link with the derived PMK/LMK.
    pub use_encryption: bool,
    /// Expect and emit application-level acks for unicast data.
    pub enable_app_ack: bool,
    /// Radio channel 1-13; -1 derives the channel from the group id.
    pub channel: i8,
    /// PHY rate applied to the interface and each registered peer.
    pub phy_rate: PhyRate,
    /// Transmit queue depth; also the buffer pool size.
    pub queue_len: u16,
    /// Largest frame this bus will build, clamped to the radio MTU.
    pub max_payload: u16,
    /// Default producer wait when the queue is full.
    pub send_timeout: Duration,
    /// Retries after the first physical attempt.
    pub max_retries: u8,
    /// Pause between a failure and its retry.
    pub retry_delay: Duration,
    /// Deadline for one physical attempt, and for an awaited app ack.
    pub tx_timeout: Duration,
    /// Broadcast a join request this often; zero disables auto-join.
    pub auto_join_interval: Duration,
    /// Liveness ladder unit; zero disables heartbeat maintenance.
    pub heartbeat_interval: Duration,
    /// Broadcast replay window size, clipped to 32; zero disables filtering.
    pub replay_window: u16,
    /// Reseed the 16-bit counters this often.
    pub reseed_interval: Duration,
}

impl Config {
    /// Configuration with the stock defaults for the given group.
    pub fn new(group_name: &str) -> Self {
        Config {
            group_name: String::from(group_name),
            use_encryption: true,
            enable_app_ack: true,
            channel: -1,
            phy_rate: PhyRate::MBPS_1_LONG,
            queue_len: 16,
            max_payload: 1470,
            send_timeout: Duration::from_millis(50),
            max_retries: 1,
            retry_delay: Duration::ZERO,
            tx_timeout: Duration::from_millis(120),
            auto_join_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            replay_window: 16,
            reseed_interval: Duration::from_hours(1),
        }
    }
}

/// Compile-time table sizes.
///
/// Picks the fixed memory bounds for the peer and sender tables. The
/// defaults suit a node tracking a full group on a 256 KB-class device;
/// `SmallCapacities` halves everything for tighter parts.
pub trait Capacities {
    /// Fixed peer table size.
    const MAX_PEERS: usize;
    /// Broadcast sender-window table size (LRU evicted).
    const MAX_SENDERS: usize;
}

/// Capacities for a typical deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCapacities;

impl Capacities for DefaultCapacities {
    const MAX_PEERS: usize = 20;
    const MAX_SENDERS: usize = 16;
}

/// Capacities for memory-constrained targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallCapacities;

impl Capacities for SmallCapacities {
    const MAX_PEERS: usize = 8;
    const MAX_SENDERS: usize = 4;
}
