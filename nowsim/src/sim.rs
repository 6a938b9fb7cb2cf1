//! The discrete-event stepper.

use std::cell::Cell;
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use nowbus::{
    Bus, Clock, Config, Duration, Mac, Random, SoftwareCrypto, Timestamp, BROADCAST_MAC,
};

use crate::radio::{SentFrame, SimRadio};

/// Shared stepped clock. Every node clones one handle; the simulator
/// advances it.
#[derive(Clone)]
pub struct SimClock {
    now_ms: Rc<Cell<u64>>,
}

impl SimClock {
    fn new(now_ms: Rc<Cell<u64>>) -> Self {
        SimClock { now_ms }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_ms.get())
    }

    async fn sleep_until(&self, _deadline: Timestamp) {}
}

/// Seeded LCG random source; deterministic per node.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        SimRandom { state: seed }
    }
}

impl Random for SimRandom {
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

/// A bus under simulation.
pub type SimBus = Bus<SimRadio, SoftwareCrypto, SimRandom, SimClock>;

struct SimNode {
    mac: Mac,
    bus: SimBus,
}

/// One frame that went over the virtual air (before any drop decision).
#[derive(Debug, Clone)]
pub struct Delivered {
    pub from: Mac,
    pub to: Mac,
    pub bytes: Vec<u8>,
}

/// Safety bound on pump rounds; a quiescent network settles in far fewer.
const MAX_PUMP_ROUNDS: usize = 64;

/// Multi-node simulator with per-direction link control.
pub struct Simulator {
    nodes: Vec<SimNode>,
    now_ms: Rc<Cell<u64>>,
    /// Severed directed links; everything else is connected.
    down_links: HashSet<(Mac, Mac)>,
    /// Next N frames sent by a node vanish in the air (status still ok).
    drop_from: HashMap<Mac, u32>,
    /// Next N sends by a node fail physically (no delivery either).
    fail_from: HashMap<Mac, u32>,
    /// Log of every frame handed to the air, including dropped ones.
    pub air_log: Vec<Delivered>,
    next_seed: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Simulator {
            nodes: Vec::new(),
            now_ms: Rc::new(Cell::new(0)),
            down_links: HashSet::new(),
            drop_from: HashMap::new(),
            fail_from: HashMap::new(),
            air_log: Vec::new(),
            next_seed: 0x0DDB_1A5E_5BAD_5EED,
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_ms.get())
    }

    /// Create a node in `group`. The closure tweaks its configuration
    /// before startup. Returns the node's address.
    pub fn add_node(&mut self, group: &str, configure: impl FnOnce(&mut Config)) -> Mac {
        let index = self.nodes.len() as u8;
        let mac: Mac = [0x02, 0xEB, 0x00, 0x00, 0x00, index + 1];
        let mut config = Config::new(group);
        // Keep the background chatter off unless a test asks for it.
        config.auto_join_interval = Duration::ZERO;
        config.heartbeat_interval = Duration::ZERO;
        configure(&mut config);

        self.next_seed = self.next_seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
        let bus = Bus::begin(
            SimRadio::new(mac),
            SoftwareCrypto,
            SimRandom::with_seed(self.next_seed),
            SimClock::new(self.now_ms.clone()),
            config,
        )
        .expect("sim node config is valid");
        self.nodes.push(SimNode { mac, bus });
        mac
    }

    pub fn bus(&self, mac: &Mac) -> &SimBus {
        &self.nodes[self.index_of(mac)].bus
    }

    pub fn bus_mut(&mut self, mac: &Mac) -> &mut SimBus {
        let i = self.index_of(mac);
        &mut self.nodes[i].bus
    }

    fn index_of(&self, mac: &Mac) -> usize {
        self.nodes
            .iter()
            .position(|n| &n.mac == mac)
            .expect("unknown sim node")
    }

    /// Sever or restore both directions between `a` and `b`.
    pub fn set_link(&mut self, a: &Mac, b: &Mac, up: bool) {
        self.set_link_oneway(a, b, up);
        self.set_link_oneway(b, a, up);
    }

    /// Sever or restore only the `from` -> `to` direction.
    pub fn set_link_oneway(&mut self, from: &Mac, to: &Mac, up: bool) {
        if up {
            self.down_links.remove(&(*from, *to));
        } else {
            self.down_links.insert((*from, *to));
        }
    }

    fn link_up(&self, from: &Mac, to: &Mac) -> bool {
        !self.down_links.contains(&(*from, *to))
    }

    /// Drop the next `n` frames sent by `mac` after a successful physical
    /// send; models a lost frame whose MAC-level ack still made it.
    pub fn drop_next_from(&mut self, mac: &Mac, n: u32) {
        *self.drop_from.entry(*mac).or_insert(0) += n;
    }

    /// Fail the next `n` physical sends by `mac` outright.
    pub fn fail_next_from(&mut self, mac: &Mac, n: u32) {
        *self.fail_from.entry(*mac).or_insert(0) += n;
    }

    /// Hand raw bytes to `target` as if `from` had transmitted them; the
    /// tool for replay and reinjection tests.
    pub fn inject(&mut self, target: &Mac, from: &Mac, bytes: &[u8]) {
        let now = self.now();
        let i = self.index_of(target);
        self.nodes[i].bus.handle_rx(from, bytes, now);
    }

    /// Advance the clock without running anyone.
    pub fn advance(&mut self, d: Duration) {
        self.now_ms.set(self.now_ms.get() + d.as_millis());
    }

    /// Run every node's maintenance and propagate frames until the
    /// network is quiescent at the current instant.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut progress = false;
            for i in 0..self.nodes.len() {
                let now = self.now();
                self.nodes[i].bus.handle_timer(now);
                let sent = self.nodes[i].bus.radio_mut().take_sent();
                for frame in sent {
                    progress = true;
                    self.propagate(i, frame);
                }
            }
            if !progress {
                break;
            }
        }
    }

    /// Step time forward in `tick` increments, pumping at each step.
    pub fn run_for(&mut self, total: Duration, tick: Duration) {
        self.pump();
        let mut elapsed = 0u64;
        while elapsed < total.as_millis() {
            self.advance(tick);
            elapsed += tick.as_millis();
            self.pump();
        }
    }

    fn consume(map: &mut HashMap<Mac, u32>, mac: &Mac) -> bool {
        match map.get_mut(mac) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn propagate(&mut self, sender: usize, frame: SentFrame) {
        let now = self.now();
        let from = self.nodes[sender].mac;
        self.air_log.push(Delivered {
            from,
            to: frame.to,
            bytes: frame.bytes.clone(),
        });

        if Self::consume(&mut self.fail_from, &from) {
            self.nodes[sender].bus.handle_tx_status(false, now);
            return;
        }
        self.nodes[sender].bus.handle_tx_status(true, now);

        if Self::consume(&mut self.drop_from, &from) {
            return;
        }

        if frame.to == BROADCAST_MAC {
            for i in 0..self.nodes.len() {
                if i == sender {
                    continue;
                }
                let to = self.nodes[i].mac;
                if self.link_up(&from, &to) {
                    self.nodes[i].bus.handle_rx(&from, &frame.bytes, now);
                }
            }
        } else if let Some(i) = self.nodes.iter().position(|n| n.mac == frame.to) {
            if self.link_up(&from, &frame.to) {
                self.nodes[i].bus.handle_rx(&from, &frame.bytes, now);
            }
        }
    }
}
