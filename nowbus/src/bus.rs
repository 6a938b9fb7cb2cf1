//! The bus: lifecycle, producer API, and the worker loop.
//!
//! One `Bus` instance owns the radio and every piece of protocol state.
//! The engine itself is synchronous and event-driven: `handle_rx`,
//! `handle_tx_status` and `handle_timer` take an explicit `now` and can be
//! called directly by a simulator or test harness. `run` is the production
//! driver, multiplexing the radio's receive queue, its send-completion
//! signal and the timer onto those handlers from a single task.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;

use embassy_futures::select::{select3, Either3};

use crate::config::{Capacities, Config, DefaultCapacities};
use crate::debug::DebugEvent;
use crate::keys::{derive_keys, DerivedKeys};
use crate::metrics::BusMetrics;
use crate::peers::PeerTable;
use crate::pool::BufferPool;
use crate::queue::{Dest, TxItem, TxQueue};
use crate::replay::SenderTable;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Crypto, Radio, Random};
use crate::tx::TxPhase;
use crate::types::{
    JoinReq, Leave, Mac, PacketType, SendStatus, SendTimeout, BROADCAST_MAC, JOIN_REQ_LEN,
    LEAVE_LEN, MIN_FRAME_CAPACITY, NONCE_LEN,
};
use crate::wire::{frame_overhead, write_frame, Encode};

/// Idle wake granularity of the worker loop.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Application data callback: source, payload, retransmission flag,
/// broadcast flag.
pub type ReceiveCallback = Box<dyn FnMut(&Mac, &[u8], bool, bool) + Send>;
/// Send outcome callback: destination and status.
pub type SendResultCallback = Box<dyn FnMut(&Mac, SendStatus) + Send>;
/// Application ack callback: acking peer and acknowledged message id.
pub type AppAckCallback = Box<dyn FnMut(&Mac, u16) + Send>;
/// Membership event callback: peer, accepted flag, ack-direction flag.
pub type JoinEventCallback = Box<dyn FnMut(&Mac, bool, bool) + Send>;

/// Startup failure.
#[derive(Debug)]
pub enum BeginError<E> {
    /// Empty group name, zero queue length or zero payload size.
    InvalidConfig,
    /// The radio failed to initialize.
    Radio(E),
}

impl<E: core::fmt::Debug> core::fmt::Display for BeginError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BeginError::InvalidConfig => write!(f, "invalid configuration"),
            BeginError::Radio(e) => write!(f, "radio init failed: {e:?}"),
        }
    }
}

/// An authenticated, group-scoped message bus over a datagram radio.
pub struct Bus<R, C, Rng, Clk, Cap: Capacities = DefaultCapacities> {
    pub(crate) radio: R,
    pub(crate) crypto: C,
    pub(crate) random: Rng,
    pub(crate) clock: Clk,
    _cap: PhantomData<Cap>,

    pub(crate) config: Config,
    pub(crate) keys: DerivedKeys,
    pub(crate) self_mac: Mac,

    pub(crate) peers: PeerTable,
    pub(crate) senders: SenderTable,
    pub(crate) pool: BufferPool,
    pub(crate) queue: TxQueue,

    // Scheduler state. Exactly one frame is in flight at a time.
    pub(crate) current_tx: Option<TxItem>,
    pub(crate) tx_phase: TxPhase,
    pub(crate) retry_count: u8,
    pub(crate) tx_deadline: Timestamp,

    pub(crate) msg_counter: u16,
    pub(crate) broadcast_seq: u16,
    pub(crate) last_reseed: Timestamp,
    /// `None` until the first auto-join fires, so startup rendezvous is
    /// immediate rather than one interval late.
    pub(crate) last_auto_join: Option<Timestamp>,

    pub(crate) pending_join: bool,
    pub(crate) pending_nonce_a: [u8; NONCE_LEN],
    pub(crate) stored_nonce_b: Option<[u8; NONCE_LEN]>,

    pub(crate) metrics: BusMetrics,

    pub(crate) receive_cb: Option<ReceiveCallback>,
    pub(crate) send_result_cb: Option<SendResultCallback>,
    pub(crate) app_ack_cb: Option<AppAckCallback>,
    pub(crate) join_event_cb: Option<JoinEventCallback>,

    #[cfg(feature = "debug")]
    debug_channel: crate::debug::DebugChannel,
}

impl<R, C, Rng, Clk, Cap> Bus<R, C, Rng, Clk, Cap>
where
    R: Radio,
    C: Crypto,
    Rng: Random,
    Clk: Clock,
    Cap: Capacities,
{
    /// Bring the bus up: validate the configuration, derive the group
    /// keys, initialize and tune the radio, and preallocate every buffer.
    /// Nothing allocates on the data path after this returns.
    pub fn begin(
        mut radio: R,
        crypto: C,
        mut random: Rng,
        clock: Clk,
        mut config: Config,
    ) -> Result<Self, BeginError<R::Error>> {
        if config.group_name.is_empty() || config.queue_len == 0 || config.max_payload == 0 {
            return Err(BeginError::InvalidConfig);
        }

        // Clip the frame size to what the radio can carry, with a floor of
        // header plus group id so control frames always fit.
        let requested = config.max_payload;
        let mut cap = usize::from(config.max_payload).min(radio.mtu());
        if cap < MIN_FRAME_CAPACITY {
            cap = MIN_FRAME_CAPACITY;
        }
        config.max_payload = cap as u16;

        let keys = derive_keys(&crypto, &config.group_name);

        let auto_channel = config.channel == -1;
        let channel: u8 = if auto_channel {
            ((keys.group_id % 13) + 1) as u8
        } else {
            config.channel.clamp(1, 13) as u8
        };
        config.channel = channel as i8;

        config.replay_window = config.replay_window.min(crate::types::MAX_REPLAY_WINDOW);

        radio.init().map_err(BeginError::Radio)?;
        let self_mac = radio.self_mac();
        // Channel, rate and key setup failures are tolerated the way a
        // mis-tuned interface is: the bus still runs, frames may not pass.
        let _ = radio.set_channel(channel);
        let _ = radio.set_rate(config.phy_rate);
        if config.use_encryption {
            let _ = radio.set_group_key(&keys.pmk);
        }
        let _ = radio.add_link_peer(&BROADCAST_MAC, None);

        let now = clock.now();
        let msg_counter = random.next_u16();
        let broadcast_seq = random.next_u16();

        let pool = BufferPool::new(usize::from(config.queue_len), usize::from(config.max_payload));
        let queue = TxQueue::new(usize::from(config.queue_len));

        let bus = Bus {
            radio,
            crypto,
            random,
            clock,
            _cap: PhantomData,
            peers: PeerTable::new(Cap::MAX_PEERS),
            senders: SenderTable::new(Cap::MAX_SENDERS),
            pool,
            queue,
            current_tx: None,
            tx_phase: TxPhase::Sending,
            retry_count: 0,
            tx_deadline: now,
            msg_counter,
            broadcast_seq,
            last_reseed: now,
            // Primed so the first maintenance pass joins immediately.
            last_auto_join: None,
            pending_join: false,
            pending_nonce_a: [0; NONCE_LEN],
            stored_nonce_b: None,
            metrics: BusMetrics::new(),
            receive_cb: None,
            send_result_cb: None,
            app_ack_cb: None,
            join_event_cb: None,
            self_mac,
            keys,
            config,
            #[cfg(feature = "debug")]
            debug_channel: crate::debug::DebugChannel::new(),
        };
        if auto_channel {
            bus.emit_debug(DebugEvent::AutoChannel { channel });
        }
        if requested != bus.config.max_payload {
            bus.emit_debug(DebugEvent::PayloadClipped {
                requested,
                clipped: bus.config.max_payload,
            });
        }
        bus.emit_debug(DebugEvent::Started {
            channel,
            max_payload: bus.config.max_payload,
        });
        Ok(bus)
    }

    /// Shorthand startup with stock defaults.
    pub fn begin_simple(
        radio: R,
        crypto: C,
        random: Rng,
        clock: Clk,
        group_name: &str,
        use_encryption: bool,
        queue_len: u16,
    ) -> Result<Self, BeginError<R::Error>> {
        let mut config = Config::new(group_name);
        config.use_encryption = use_encryption;
        config.queue_len = queue_len;
        Self::begin(radio, crypto, random, clock, config)
    }

    /// Hard shutdown: tear the radio down and release everything.
    pub fn end(mut self) {
        self.radio.deinit();
    }

    /// Drive the bus forever. Spawn this on the executor; everything else
    /// (producer calls, callback delivery) happens cooperatively with it.
    pub async fn run(&mut self) -> ! {
        loop {
            let wake = self.next_wake(self.clock.now());
            let event = select3(
                self.radio.incoming().receive(),
                self.radio.tx_status().wait(),
                self.clock.sleep_until(wake),
            )
            .await;
            let now = self.clock.now();
            match event {
                Either3::First(frame) => self.handle_rx(&frame.mac, &frame.data, now),
                Either3::Second(status) => self.handle_tx_status(status.ok, now),
                Either3::Third(()) => {}
            }
            self.handle_timer(now);
        }
    }

    /// Periodic maintenance and scheduler servicing. Call at least every
    /// 100 ms; `run` does.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.reseed_counters(now);
        self.auto_join_tick(now);
        self.liveness_scan(now);
        self.service_tx(now);
    }

    fn next_wake(&self, now: Timestamp) -> Timestamp {
        let mut wake = now + IDLE_POLL;
        if let Some(item) = self.current_tx {
            let deadline = if self.tx_phase == TxPhase::AwaitingAppAck {
                item.app_ack_deadline
            } else {
                self.tx_deadline
            };
            wake = wake.min(deadline);
        }
        wake
    }

    // --- Producer API ---

    /// Queue a unicast data frame to `mac`.
    pub fn send_to(&mut self, mac: &Mac, data: &[u8], timeout: SendTimeout) -> bool {
        self.enqueue_common(Dest::Unicast, PacketType::DataUnicast, mac, data, timeout)
    }

    /// Queue a broadcast data frame to the whole group.
    pub fn broadcast(&mut self, data: &[u8], timeout: SendTimeout) -> bool {
        self.enqueue_common(
            Dest::Broadcast,
            PacketType::DataBroadcast,
            &BROADCAST_MAC,
            data,
            timeout,
        )
    }

    /// Queue one unicast per known peer. Returns false if any enqueue
    /// failed.
    pub fn send_to_all_peers(&mut self, data: &[u8], timeout: SendTimeout) -> bool {
        let macs: Vec<Mac> = self.peers.iter().map(|p| p.mac).collect();
        let mut ok = true;
        for mac in macs {
            if !self.send_to(&mac, data, timeout) {
                ok = false;
            }
        }
        ok
    }

    /// Broadcast a join request. `target` narrows which member should
    /// answer; `None` invites anyone in the group.
    pub fn send_join_request(&mut self, target: Option<&Mac>, timeout: SendTimeout) -> bool {
        let now = self.clock.now();
        let mut nonce_a = [0u8; NONCE_LEN];
        nonce_a[..4].copy_from_slice(&(now.as_millis() as u32).to_le_bytes());
        self.random.fill_bytes(&mut nonce_a[4..]);

        let req = JoinReq {
            nonce_a,
            prev_token: self.stored_nonce_b.unwrap_or([0; NONCE_LEN]),
            target_mac: *target.unwrap_or(&BROADCAST_MAC),
        };
        self.pending_nonce_a = nonce_a;
        self.pending_join = true;

        let mut buf = [0u8; JOIN_REQ_LEN];
        let len = req.encode_into(&mut buf);
        self.enqueue_common(
            Dest::Broadcast,
            PacketType::JoinReq,
            &BROADCAST_MAC,
            &buf[..len],
            timeout,
        )
    }

    /// Announce departure to the group. Also reports the local leave
    /// through the join-event callback.
    pub fn send_leave_request(&mut self, timeout: SendTimeout) -> bool {
        let leave = Leave { mac: self.self_mac };
        let mut buf = [0u8; LEAVE_LEN];
        let len = leave.encode_into(&mut buf);
        let ok = self.enqueue_common(
            Dest::Broadcast,
            PacketType::Leave,
            &BROADCAST_MAC,
            &buf[..len],
            timeout,
        );
        if ok {
            let mac = self.self_mac;
            self.fire_join_event(&mac, false, false);
        }
        ok
    }

    /// Frame, allocate and queue one transmission.
    ///
    /// This rendition is cooperative, so a full queue reports
    /// `DroppedFull` immediately instead of blocking the producer; the
    /// timeout argument is accepted for interface stability.
    pub(crate) fn enqueue_common(
        &mut self,
        dest: Dest,
        pkt_type: PacketType,
        mac: &Mac,
        payload: &[u8],
        _timeout: SendTimeout,
    ) -> bool {
        let now = self.clock.now();

        let total = frame_overhead(pkt_type) + payload.len();
        if total > usize::from(self.config.max_payload) {
            self.metrics.too_large += 1;
            self.emit_debug(DebugEvent::EnqueueRejected {
                mac: *mac,
                status: SendStatus::TooLarge,
            });
            self.report_send(mac, SendStatus::TooLarge);
            return false;
        }

        let Some(buffer) = self.pool.alloc() else {
            self.metrics.dropped_full += 1;
            self.emit_debug(DebugEvent::EnqueueRejected {
                mac: *mac,
                status: SendStatus::DroppedFull,
            });
            self.report_send(mac, SendStatus::DroppedFull);
            return false;
        };

        let (msg_id, seq);
        let id = if pkt_type.uses_seq() {
            self.broadcast_seq = self.broadcast_seq.wrapping_add(1);
            msg_id = 0;
            seq = self.broadcast_seq;
            seq
        } else {
            self.msg_counter = self.msg_counter.wrapping_add(1);
            msg_id = self.msg_counter;
            seq = 0;
            msg_id
        };

        let len = {
            let buf = self.pool.buffer_mut(buffer);
            write_frame(buf, pkt_type, id, payload, &self.keys, &self.crypto)
        };

        let expect_ack = self.config.enable_app_ack && pkt_type == PacketType::DataUnicast;
        let item = TxItem {
            buffer,
            len: len as u16,
            msg_id,
            seq,
            dest,
            pkt_type,
            is_retry: false,
            mac: *mac,
            expect_ack,
            app_ack_deadline: now + self.config.tx_timeout,
        };

        if let Err(rejected) = self.queue.push(item) {
            self.pool.free(rejected.buffer);
            self.metrics.dropped_full += 1;
            self.emit_debug(DebugEvent::EnqueueRejected {
                mac: *mac,
                status: SendStatus::DroppedFull,
            });
            self.report_send(mac, SendStatus::DroppedFull);
            return false;
        }
        self.metrics.queued += 1;
        self.report_send(mac, SendStatus::Queued);
        true
    }

    // --- Peer management ---

    /// Register a peer explicitly. Fails when the table is full or the
    /// radio rejects the link registration.
    pub fn add_peer(&mut self, mac: &Mac) -> bool {
        if self.peers.find(mac).is_some() {
            return true;
        }
        let now = self.clock.now();
        if !self.peers.insert(mac, now) {
            return false;
        }
        let lmk = self.config.use_encryption.then_some(&self.keys.lmk);
        if self.radio.add_link_peer(mac, lmk).is_err() {
            self.peers.remove(mac);
            return false;
        }
        true
    }

    /// Register a batch of peers. Returns false if any registration
    /// failed.
    pub fn init_peers(&mut self, macs: &[Mac]) -> bool {
        let mut ok = true;
        for mac in macs {
            if !self.add_peer(mac) {
                ok = false;
            }
        }
        ok
    }

    /// Drop a peer from the table and the radio's link registry.
    pub fn remove_peer(&mut self, mac: &Mac) -> bool {
        let _ = self.radio.remove_link_peer(mac);
        self.peers.remove(mac);
        true
    }

    pub fn has_peer(&self, mac: &Mac) -> bool {
        self.peers.find(mac).is_some()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.count()
    }

    /// The `index`-th known peer address.
    pub fn peer_at(&self, index: usize) -> Option<Mac> {
        self.peers.mac_at(index)
    }

    /// Find `mac` in the peer table, allocating a slot (and registering
    /// the encrypted link) on first contact. False means the table is
    /// full and the frame must be dropped.
    pub(crate) fn ensure_peer(&mut self, mac: &Mac, now: Timestamp) -> bool {
        if self.peers.find(mac).is_some() {
            return true;
        }
        if !self.peers.insert(mac, now) {
            return false;
        }
        if self.config.use_encryption {
            let _ = self.radio.add_link_peer(mac, Some(&self.keys.lmk));
        }
        true
    }

    // --- Introspection ---

    /// Free transmit queue slots.
    pub fn send_queue_free(&self) -> u16 {
        self.queue.free_slots() as u16
    }

    /// Occupied transmit queue slots.
    pub fn send_queue_size(&self) -> u16 {
        self.queue.len() as u16
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The public 32-bit group tag.
    pub fn group_id(&self) -> u32 {
        self.keys.group_id
    }

    pub fn self_mac(&self) -> Mac {
        self.self_mac
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable radio access, for simulation harnesses that drain the
    /// virtual air.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Trace event channel.
    #[cfg(feature = "debug")]
    pub fn debug_events(&self) -> &crate::debug::DebugChannel {
        &self.debug_channel
    }

    // --- Callback registration (install before spawning `run`) ---

    pub fn on_receive(&mut self, cb: impl FnMut(&Mac, &[u8], bool, bool) + Send + 'static) {
        self.receive_cb = Some(Box::new(cb));
    }

    pub fn on_send_result(&mut self, cb: impl FnMut(&Mac, SendStatus) + Send + 'static) {
        self.send_result_cb = Some(Box::new(cb));
    }

    pub fn on_app_ack(&mut self, cb: impl FnMut(&Mac, u16) + Send + 'static) {
        self.app_ack_cb = Some(Box::new(cb));
    }

    pub fn on_join_event(&mut self, cb: impl FnMut(&Mac, bool, bool) + Send + 'static) {
        self.join_event_cb = Some(Box::new(cb));
    }

    // --- Callback dispatch ---

    pub(crate) fn report_send(&mut self, mac: &Mac, status: SendStatus) {
        if let Some(cb) = self.send_result_cb.as_mut() {
            cb(mac, status);
        }
    }

    pub(crate) fn fire_join_event(&mut self, mac: &Mac, accepted: bool, is_ack: bool) {
        if let Some(cb) = self.join_event_cb.as_mut() {
            cb(mac, accepted, is_ack);
        }
    }

    #[cfg(feature = "debug")]
    pub(crate) fn emit_debug(&self, event: DebugEvent) {
        let _ = self.debug_channel.try_send(event);
    }

    #[cfg(not(feature = "debug"))]
    #[inline]
    pub(crate) fn emit_debug(&self, _event: DebugEvent) {}
}
