//! Platform traits: radio, crypto, randomness, and time.
//!
//! The bus is generic over these four collaborators so the same engine runs
//! against a real driver, a host-side simulator, or the deterministic mocks
//! in [`test_impls`].

use core::fmt::Debug;

use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::config::PhyRate;
use crate::time::Timestamp;
use crate::types::Mac;

/// Depth of the driver-to-worker receive queue.
pub const RX_QUEUE_DEPTH: usize = 8;

/// A frame handed up by the radio driver.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub mac: Mac,
    pub data: Vec<u8>,
}

/// Driver-reported completion of the frame most recently handed to
/// [`Radio::send`].
#[derive(Debug, Clone, Copy)]
pub struct TxStatus {
    pub mac: Mac,
    pub ok: bool,
}

/// Queue the driver's receive callback pushes into.
pub type RxQueue = Channel<CriticalSectionRawMutex, RxFrame, RX_QUEUE_DEPTH>;

/// Single-slot send-completion notification. The driver overwrites any
/// unconsumed value; the worker must treat it as "latest status wins".
pub type TxStatusSignal = Signal<CriticalSectionRawMutex, TxStatus>;

/// Radio driver abstraction.
///
/// Models a connectionless datagram radio with per-frame completion
/// signalling and MAC addressing: unicast and broadcast sends, a small MTU,
/// optional per-peer link encryption keyed at registration time.
///
/// The driver's receive and send-complete callbacks run in a restricted
/// context (often ISR-adjacent); they communicate with the worker only
/// through [`Radio::incoming`] and [`Radio::tx_status`].
pub trait Radio {
    /// Driver-specific error type.
    type Error: Debug;

    /// Largest frame the driver accepts.
    fn mtu(&self) -> usize;

    /// This node's own hardware address.
    fn self_mac(&self) -> Mac;

    /// Bring the radio up. Called once from `begin`.
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Tear the radio down and unregister callbacks.
    fn deinit(&mut self);

    /// Tune to a channel (1-13).
    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    /// Select the PHY rate for subsequent transmissions.
    fn set_rate(&mut self, rate: PhyRate) -> Result<(), Self::Error>;

    /// Install the group-wide primary master key for link encryption.
    fn set_group_key(&mut self, pmk: &[u8; 16]) -> Result<(), Self::Error>;

    /// Register a peer address, optionally with a local master key for
    /// link-layer encryption.
    fn add_link_peer(&mut self, mac: &Mac, lmk: Option<&[u8; 16]>) -> Result<(), Self::Error>;

    /// Remove a registered peer address.
    fn remove_link_peer(&mut self, mac: &Mac) -> Result<(), Self::Error>;

    /// Start transmitting one frame. Completion is reported asynchronously
    /// through [`Radio::tx_status`]; an `Err` here counts as a physical
    /// send failure.
    fn send(&mut self, mac: &Mac, frame: &[u8]) -> Result<(), Self::Error>;

    /// Received frames, pushed by the driver callback.
    fn incoming(&self) -> &RxQueue;

    /// Send-completion notification slot.
    fn tx_status(&self) -> &TxStatusSignal;
}

/// Hashing and message authentication.
///
/// Pluggable so hardware-accelerated or vendor implementations can replace
/// the software one in [`crate::crypto::SoftwareCrypto`].
pub trait Crypto {
    /// SHA-256 digest of `data`.
    fn sha256(&self, data: &[u8]) -> [u8; 32];

    /// HMAC-SHA-256 of `data` under `key`.
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32];
}

/// Cryptographic random bytes.
pub trait Random {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&mut self, buf: &mut [u8]);

    /// A random `u16`, used to seed the wire counters.
    fn next_u16(&mut self) -> u16 {
        let mut b = [0u8; 2];
        self.fill_bytes(&mut b);
        u16::from_le_bytes(b)
    }
}

/// Monotonic millisecond clock.
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since boot.
    fn now(&self) -> Timestamp;

    /// Sleep until `deadline`. Only the async worker loop uses this; the
    /// synchronous handlers take an explicit `now` instead.
    async fn sleep_until(&self, deadline: Timestamp);
}

#[cfg(test)]
pub mod test_impls {
    //! Deterministic trait implementations for unit tests.

    use super::*;
    use crate::time::Duration;
    use core::cell::Cell;

    /// Radio that records outgoing frames and lets tests script failures.
    pub struct MockRadio {
        pub mac: Mac,
        pub mtu: usize,
        /// Every frame handed to `send`, in order.
        pub tx_log: Vec<(Mac, Vec<u8>)>,
        /// Number of upcoming `send` calls that return an error.
        pub fail_sends: usize,
        pub channel: Option<u8>,
        pub rate: Option<PhyRate>,
        pub group_key: Option<[u8; 16]>,
        pub link_peers: Vec<Mac>,
        pub initialized: bool,
        rx: RxQueue,
        status: TxStatusSignal,
    }

    impl MockRadio {
        pub fn new(mac: Mac) -> Self {
            Self {
                mac,
                mtu: 1470,
                tx_log: Vec::new(),
                fail_sends: 0,
                channel: None,
                rate: None,
                group_key: None,
                link_peers: Vec::new(),
                initialized: false,
                rx: Channel::new(),
                status: Signal::new(),
            }
        }

        /// Drain and return everything sent so far.
        pub fn take_sent(&mut self) -> Vec<(Mac, Vec<u8>)> {
            core::mem::take(&mut self.tx_log)
        }
    }

    #[derive(Debug)]
    pub struct MockRadioError;

    impl Radio for MockRadio {
        type Error = MockRadioError;

        fn mtu(&self) -> usize {
            self.mtu
        }

        fn self_mac(&self) -> Mac {
            self.mac
        }

        fn init(&mut self) -> Result<(), Self::Error> {
            self.initialized = true;
            Ok(())
        }

        fn deinit(&mut self) {
            self.initialized = false;
        }

        fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
            self.channel = Some(channel);
            Ok(())
        }

        fn set_rate(&mut self, rate: PhyRate) -> Result<(), Self::Error> {
            self.rate = Some(rate);
            Ok(())
        }

        fn set_group_key(&mut self, pmk: &[u8; 16]) -> Result<(), Self::Error> {
            self.group_key = Some(*pmk);
            Ok(())
        }

        fn add_link_peer(&mut self, mac: &Mac, _lmk: Option<&[u8; 16]>) -> Result<(), Self::Error> {
            if !self.link_peers.contains(mac) {
                self.link_peers.push(*mac);
            }
            Ok(())
        }

        fn remove_link_peer(&mut self, mac: &Mac) -> Result<(), Self::Error> {
            self.link_peers.retain(|m| m != mac);
            Ok(())
        }

        fn send(&mut self, mac: &Mac, frame: &[u8]) -> Result<(), Self::Error> {
            if self.fail_sends > 0 {
                self.fail_sends -= 1;
                return Err(MockRadioError);
            }
            self.tx_log.push((*mac, frame.to_vec()));
            Ok(())
        }

        fn incoming(&self) -> &RxQueue {
            &self.rx
        }

        fn tx_status(&self) -> &TxStatusSignal {
            &self.status
        }
    }

    /// Deterministic LCG random source. Not cryptographic; tests only.
    pub struct MockRandom {
        pub state: u64,
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::with_seed(0x5EED_0BAD_CAFE_1234)
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Random for MockRandom {
        fn fill_bytes(&mut self, buf: &mut [u8]) {
            for b in buf {
                self.state = self
                    .state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                *b = (self.state >> 33) as u8;
            }
        }
    }

    /// Manually advanced clock.
    pub struct MockClock {
        now_ms: Cell<u64>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self {
                now_ms: Cell::new(0),
            }
        }

        pub fn advance(&self, d: Duration) {
            self.now_ms.set(self.now_ms.get() + d.as_millis());
        }

        pub fn set(&self, t: Timestamp) {
            self.now_ms.set(t.as_millis());
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Timestamp {
            Timestamp::from_millis(self.now_ms.get())
        }

        async fn sleep_until(&self, _deadline: Timestamp) {}
    }

    #[test]
    fn mock_radio_records_and_fails() {
        let mut radio = MockRadio::new([1; 6]);
        radio.fail_sends = 1;
        assert!(radio.send(&[2; 6], b"x").is_err());
        assert!(radio.send(&[2; 6], b"y").is_ok());
        let sent = radio.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, b"y");
        assert!(radio.tx_log.is_empty());
    }

    #[test]
    fn mock_random_is_deterministic() {
        let mut a = MockRandom::with_seed(7);
        let mut b = MockRandom::with_seed(7);
        assert_eq!(a.next_u16(), b.next_u16());
        let mut buf = [0u8; 8];
        a.fill_bytes(&mut buf);
        assert_ne!(buf, [0u8; 8]);
    }

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::new();
        assert_eq!(clock.now(), Timestamp::ZERO);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now().as_millis(), 250);
    }
}
