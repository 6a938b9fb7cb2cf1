//! Liveness maintenance: heartbeat escalation, peer eviction, auto-join
//! pacing and counter reseeding.
//!
//! Every peer walks a three-rung ladder keyed on silence. One heartbeat
//! interval without traffic earns a ping; two earn a targeted join request
//! (the peer may have rebooted and lost us); three and the peer is
//! declared gone, reported as a leave and evicted. Any received frame
//! resets the ladder.

use alloc::vec::Vec;

use crate::config::Capacities;
use crate::debug::DebugEvent;
use crate::queue::Dest;
use crate::time::Timestamp;
use crate::traits::{Clock, Crypto, Radio, Random};
use crate::types::{Heartbeat, HeartbeatKind, Mac, PacketType, SendTimeout, HEARTBEAT_LEN};
use crate::wire::Encode;
use crate::Bus;

enum Escalation {
    Ping(Mac),
    TargetedJoin(Mac),
    Evict(Mac, Timestamp),
}

impl<R, C, Rng, Clk, Cap> Bus<R, C, Rng, Clk, Cap>
where
    R: Radio,
    C: Crypto,
    Rng: Random,
    Clk: Clock,
    Cap: Capacities,
{
    /// Reseed both wire counters once the configured interval elapses.
    /// Bounds how long a captured sequence stream stays predictable.
    pub(crate) fn reseed_counters(&mut self, now: Timestamp) {
        if self.config.reseed_interval.is_zero() {
            return;
        }
        if now.saturating_since(self.last_reseed) < self.config.reseed_interval {
            return;
        }
        self.last_reseed = now;
        self.msg_counter = self.random.next_u16();
        self.broadcast_seq = self.random.next_u16();
        self.emit_debug(DebugEvent::CounterReseed);
    }

    /// Broadcast a join request on the configured cadence. The timer is
    /// primed at startup so the first pass fires immediately.
    pub(crate) fn auto_join_tick(&mut self, now: Timestamp) {
        if self.config.auto_join_interval.is_zero() {
            return;
        }
        let due = match self.last_auto_join {
            None => true,
            Some(last) => now.saturating_since(last) >= self.config.auto_join_interval,
        };
        if !due {
            return;
        }
        self.last_auto_join = Some(now);
        self.send_join_request(None, SendTimeout::Default);
    }

    /// Walk the peer table and run the escalation ladder. Stage marks
    /// keep each rung one-shot per silence episode.
    pub(crate) fn liveness_scan(&mut self, now: Timestamp) {
        let hb = self.config.heartbeat_interval;
        if hb.is_zero() {
            return;
        }

        // Decide first, act second: the actions below re-enter the bus
        // (enqueue, remove) and may not run under the table iteration.
        let mut actions: Vec<Escalation> = Vec::new();
        for peer in self.peers.iter_mut() {
            let elapsed = now.saturating_since(peer.last_seen);
            if elapsed >= hb * 3 {
                actions.push(Escalation::Evict(peer.mac, peer.last_seen));
            } else if elapsed >= hb * 2 {
                if peer.heartbeat_stage < 2 {
                    peer.heartbeat_stage = 2;
                    actions.push(Escalation::TargetedJoin(peer.mac));
                }
            } else if elapsed >= hb && peer.heartbeat_stage < 1 {
                peer.heartbeat_stage = 1;
                actions.push(Escalation::Ping(peer.mac));
            }
        }

        for action in actions {
            match action {
                Escalation::Ping(mac) => {
                    let ping = Heartbeat {
                        kind: HeartbeatKind::Ping,
                    };
                    let mut buf = [0u8; HEARTBEAT_LEN];
                    let len = ping.encode_into(&mut buf);
                    let _ = self.enqueue_common(
                        Dest::Unicast,
                        PacketType::Heartbeat,
                        &mac,
                        &buf[..len],
                        SendTimeout::Default,
                    );
                }
                Escalation::TargetedJoin(mac) => {
                    self.send_join_request(Some(&mac), SendTimeout::Default);
                }
                Escalation::Evict(mac, last_seen) => {
                    self.emit_debug(DebugEvent::PeerTimeout { mac, last_seen });
                    self.fire_join_event(&mac, false, false);
                    self.remove_peer(&mac);
                }
            }
        }
    }
}
