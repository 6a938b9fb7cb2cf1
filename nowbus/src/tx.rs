//! Transmit scheduler.
//!
//! Exactly one frame is in flight at any time. That single invariant makes
//! the rest of the bookkeeping provable: the retry counter refers to the
//! one current frame, an app ack can only match the one current frame, and
//! buffer ownership moves linearly from queue to scheduler to pool.
//!
//! A frame's life: popped from the queue, handed to the radio, then one of
//!
//! - physical completion, no ack expected: retired as `SentOk`;
//! - physical completion, ack expected: deadline re-armed, wait for a
//!   matching app ack (`AppAckReceived`) or expiry;
//! - physical failure or deadline expiry: retried up to `max_retries`
//!   times with the retry flag set (and the tag recomputed), then retired
//!   as `SendFailed`, `Timeout` or `AppAckTimeout` depending on what ran
//!   out.

use crate::config::Capacities;
use crate::debug::DebugEvent;
use crate::queue::TxItem;
use crate::time::Timestamp;
use crate::traits::{Clock, Crypto, Radio, Random};
use crate::types::{SendStatus, FLAG_RETRY};
use crate::wire::refresh_tag;
use crate::Bus;

/// What the in-flight frame is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxPhase {
    /// Waiting for the driver's send-completion.
    Sending,
    /// Waiting out the configured retry delay before resending.
    RetryWait,
    /// Physically delivered; waiting for the matching application ack.
    AwaitingAppAck,
}

impl<R, C, Rng, Clk, Cap> Bus<R, C, Rng, Clk, Cap>
where
    R: Radio,
    C: Crypto,
    Rng: Random,
    Clk: Clock,
    Cap: Capacities,
{
    /// Driver send-completion notification. The signal is a single
    /// overwrite slot, so only the latest status for the current physical
    /// attempt is ever observed; anything arriving outside the `Sending`
    /// phase is stale and ignored.
    pub fn handle_tx_status(&mut self, ok: bool, now: Timestamp) {
        if self.current_tx.is_none() || self.tx_phase != TxPhase::Sending {
            return;
        }
        self.complete_physical(ok, false, now);
    }

    /// One scheduler step: start the next frame when idle, or act on an
    /// expired deadline when busy.
    pub(crate) fn service_tx(&mut self, now: Timestamp) {
        let Some(item) = self.current_tx else {
            if let Some(item) = self.queue.pop() {
                self.current_tx = Some(item);
                self.retry_count = 0;
                self.tx_phase = TxPhase::Sending;
                if self.start_send() {
                    self.tx_deadline = now + self.config.tx_timeout;
                } else {
                    // Driver refusal counts as a physical failure.
                    self.complete_physical(false, false, now);
                }
            }
            return;
        };
        match self.tx_phase {
            TxPhase::Sending if now >= self.tx_deadline => {
                self.complete_physical(false, true, now);
            }
            TxPhase::RetryWait if now >= self.tx_deadline => {
                self.tx_phase = TxPhase::Sending;
                if self.start_send() {
                    self.tx_deadline = now + self.config.tx_timeout;
                } else {
                    self.complete_physical(false, false, now);
                }
            }
            TxPhase::AwaitingAppAck if now >= item.app_ack_deadline => {
                self.app_ack_expired(now);
            }
            _ => {}
        }
    }

    /// Hand the current frame to the radio. On a retry the flag bit is
    /// set first and the tag recomputed, since the flags byte is part of
    /// the tag input.
    fn start_send(&mut self) -> bool {
        let Some(item) = self.current_tx else {
            return false;
        };
        let len = usize::from(item.len);
        if item.is_retry {
            let frame = &mut self.pool.buffer_mut(item.buffer)[..len];
            frame[3] |= FLAG_RETRY;
            refresh_tag(frame, item.pkt_type, &self.keys, &self.crypto);
        }
        let frame = &self.pool.buffer(item.buffer)[..len];
        self.radio.send(&item.mac, frame).is_ok()
    }

    fn complete_physical(&mut self, ok: bool, timed_out: bool, now: Timestamp) {
        let Some(item) = self.current_tx else {
            return;
        };
        if ok {
            if item.expect_ack {
                // Physical leg done; the ack clock starts now.
                self.tx_phase = TxPhase::AwaitingAppAck;
                let deadline = now + self.config.tx_timeout;
                if let Some(cur) = self.current_tx.as_mut() {
                    cur.app_ack_deadline = deadline;
                }
                return;
            }
            self.metrics.sent_ok += 1;
            self.retire(item, SendStatus::SentOk);
            return;
        }
        let terminal = if timed_out {
            SendStatus::Timeout
        } else {
            SendStatus::SendFailed
        };
        self.retry_or_fail(item, terminal, now);
    }

    fn app_ack_expired(&mut self, now: Timestamp) {
        let Some(item) = self.current_tx else {
            return;
        };
        self.retry_or_fail(item, SendStatus::AppAckTimeout, now);
    }

    /// The shared retry ladder. Each rung resends the frame (marked as a
    /// retry); when the ladder is exhausted the frame retires with the
    /// terminal status of whatever path brought us here.
    fn retry_or_fail(&mut self, item: TxItem, terminal: SendStatus, now: Timestamp) {
        if self.retry_count < self.config.max_retries {
            self.retry_count += 1;
            if let Some(cur) = self.current_tx.as_mut() {
                cur.is_retry = true;
            }
            self.metrics.retries += 1;
            self.emit_debug(DebugEvent::SendRetry {
                mac: item.mac,
                attempt: self.retry_count,
            });
            if self.config.retry_delay.is_zero() {
                self.tx_phase = TxPhase::Sending;
                if self.start_send() {
                    self.tx_deadline = now + self.config.tx_timeout;
                    self.report_send(&item.mac, SendStatus::Retrying);
                } else {
                    self.report_send(&item.mac, SendStatus::Retrying);
                    self.complete_physical(false, false, now);
                }
            } else {
                self.tx_phase = TxPhase::RetryWait;
                self.tx_deadline = now + self.config.retry_delay;
                self.report_send(&item.mac, SendStatus::Retrying);
            }
            return;
        }
        match terminal {
            SendStatus::Timeout => self.metrics.send_timeouts += 1,
            SendStatus::SendFailed => self.metrics.send_failed += 1,
            SendStatus::AppAckTimeout => self.metrics.app_ack_timeouts += 1,
            _ => {}
        }
        self.retire(item, terminal);
    }

    /// An application ack arrived; retire the in-flight frame if it
    /// matches. The message id is the authoritative correlator.
    pub(crate) fn handle_matching_app_ack(&mut self, msg_id: u16) -> bool {
        let Some(item) = self.current_tx else {
            return false;
        };
        if !item.expect_ack || item.msg_id != msg_id {
            return false;
        }
        self.metrics.app_acks_received += 1;
        self.retire(item, SendStatus::AppAckReceived);
        true
    }

    /// Surface the terminal status, release the buffer, clear in-flight.
    fn retire(&mut self, item: TxItem, status: SendStatus) {
        self.report_send(&item.mac, status);
        self.emit_debug(DebugEvent::SendRetired {
            mac: item.mac,
            status,
        });
        self.pool.free(item.buffer);
        self.current_tx = None;
        self.retry_count = 0;
        self.tx_phase = TxPhase::Sending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SoftwareCrypto;
    use crate::traits::test_impls::{MockClock, MockRadio, MockRandom};
    use crate::types::{Mac, SendTimeout};
    use crate::Config;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use std::sync::Mutex;

    const PEER: Mac = [0x10, 0x20, 0x30, 0x40, 0x50, 0x60];

    type TestBus = Bus<MockRadio, SoftwareCrypto, MockRandom, MockClock>;

    fn test_bus(configure: impl FnOnce(&mut Config)) -> (TestBus, Arc<Mutex<Vec<SendStatus>>>) {
        let mut config = Config::new("tx-tests");
        config.enable_app_ack = false;
        config.max_retries = 2;
        configure(&mut config);
        let mut bus = Bus::begin(
            MockRadio::new([1; 6]),
            SoftwareCrypto,
            MockRandom::new(),
            MockClock::new(),
            config,
        )
        .unwrap();
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        bus.on_send_result(move |_mac, status| sink.lock().unwrap().push(status));
        (bus, statuses)
    }

    fn now(bus: &TestBus) -> Timestamp {
        bus.clock.now()
    }

    #[test]
    fn one_frame_in_flight_at_a_time() {
        let (mut bus, _) = test_bus(|_| {});
        assert!(bus.send_to(&PEER, b"one", SendTimeout::Default));
        assert!(bus.send_to(&PEER, b"two", SendTimeout::Default));
        let t = now(&bus);
        bus.handle_timer(t);
        // Only the first frame reached the radio.
        assert_eq!(bus.radio.tx_log.len(), 1);
        bus.handle_timer(t);
        assert_eq!(bus.radio.tx_log.len(), 1);
        // Completion releases the slot for the second.
        bus.handle_tx_status(true, t);
        bus.handle_timer(t);
        assert_eq!(bus.radio.tx_log.len(), 2);
    }

    #[test]
    fn success_without_ack_reports_sent_ok() {
        let (mut bus, statuses) = test_bus(|_| {});
        bus.send_to(&PEER, b"hi", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[SendStatus::Queued, SendStatus::SentOk]
        );
        assert_eq!(bus.pool.busy_count(), 0);
        assert!(bus.current_tx.is_none());
    }

    #[test]
    fn failure_walks_the_retry_ladder() {
        let (mut bus, statuses) = test_bus(|c| c.max_retries = 2);
        bus.send_to(&PEER, b"x", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(false, t);
        bus.handle_tx_status(false, t);
        bus.handle_tx_status(false, t);
        // 1 initial + 2 retries, never more.
        assert_eq!(bus.radio.tx_log.len(), 3);
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[
                SendStatus::Queued,
                SendStatus::Retrying,
                SendStatus::Retrying,
                SendStatus::SendFailed
            ]
        );
        assert_eq!(bus.pool.busy_count(), 0);
        assert_eq!(bus.metrics.retries, 2);
        assert_eq!(bus.metrics.send_failed, 1);
    }

    #[test]
    fn retries_carry_the_retry_flag() {
        let (mut bus, _) = test_bus(|_| {});
        bus.send_to(&PEER, b"x", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(false, t);
        let log = &bus.radio.tx_log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1[3] & FLAG_RETRY, 0);
        assert_ne!(log[1].1[3] & FLAG_RETRY, 0);
    }

    #[test]
    fn physical_deadline_expiry_ends_in_timeout() {
        let (mut bus, statuses) = test_bus(|c| c.max_retries = 1);
        bus.send_to(&PEER, b"x", SendTimeout::Default);
        bus.handle_timer(now(&bus));
        // No completion ever arrives; let both attempts time out.
        bus.clock.advance(crate::time::Duration::from_millis(121));
        bus.handle_timer(now(&bus));
        bus.clock.advance(crate::time::Duration::from_millis(121));
        bus.handle_timer(now(&bus));
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[
                SendStatus::Queued,
                SendStatus::Retrying,
                SendStatus::Timeout
            ]
        );
        assert_eq!(bus.radio.tx_log.len(), 2);
    }

    #[test]
    fn retry_delay_defers_the_resend() {
        let (mut bus, _) = test_bus(|c| {
            c.max_retries = 1;
            c.retry_delay = crate::time::Duration::from_millis(40);
        });
        bus.send_to(&PEER, b"x", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(false, t);
        // Failure noted, but the resend waits out the delay.
        assert_eq!(bus.radio.tx_log.len(), 1);
        bus.clock.advance(crate::time::Duration::from_millis(39));
        bus.handle_timer(now(&bus));
        assert_eq!(bus.radio.tx_log.len(), 1);
        bus.clock.advance(crate::time::Duration::from_millis(2));
        bus.handle_timer(now(&bus));
        assert_eq!(bus.radio.tx_log.len(), 2);
    }

    #[test]
    fn radio_refusal_is_a_physical_failure() {
        let (mut bus, statuses) = test_bus(|c| c.max_retries = 1);
        bus.radio.fail_sends = 2;
        bus.send_to(&PEER, b"x", SendTimeout::Default);
        bus.handle_timer(now(&bus));
        // Both the first attempt and the retry were refused outright.
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[
                SendStatus::Queued,
                SendStatus::Retrying,
                SendStatus::SendFailed
            ]
        );
        assert_eq!(bus.pool.busy_count(), 0);
    }

    #[test]
    fn app_ack_retires_the_matching_frame() {
        let (mut bus, statuses) = test_bus(|c| c.enable_app_ack = true);
        bus.send_to(&PEER, b"need-ack", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);
        // Physically sent, still in flight awaiting the ack.
        assert!(bus.current_tx.is_some());
        assert_eq!(bus.pool.busy_count(), 1);

        let msg_id = bus.current_tx.unwrap().msg_id;
        assert!(!bus.handle_matching_app_ack(msg_id.wrapping_add(1)));
        assert!(bus.handle_matching_app_ack(msg_id));
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[SendStatus::Queued, SendStatus::AppAckReceived]
        );
        assert_eq!(bus.pool.busy_count(), 0);
    }

    #[test]
    fn missing_app_ack_retries_then_times_out() {
        let (mut bus, statuses) = test_bus(|c| {
            c.enable_app_ack = true;
            c.max_retries = 1;
        });
        bus.send_to(&PEER, b"need-ack", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);

        // Ack never comes; deadline expiry resends once.
        bus.clock.advance(crate::time::Duration::from_millis(121));
        let t = now(&bus);
        bus.handle_timer(t);
        assert_eq!(bus.radio.tx_log.len(), 2);
        bus.handle_tx_status(true, t);

        // Still nothing; the ladder is spent.
        bus.clock.advance(crate::time::Duration::from_millis(121));
        bus.handle_timer(now(&bus));
        assert_eq!(
            statuses.lock().unwrap().as_slice(),
            &[
                SendStatus::Queued,
                SendStatus::Retrying,
                SendStatus::AppAckTimeout
            ]
        );
        assert_eq!(bus.pool.busy_count(), 0);
        assert_eq!(bus.metrics.app_ack_timeouts, 1);
    }

    #[test]
    fn stale_completion_outside_sending_phase_is_ignored() {
        let (mut bus, statuses) = test_bus(|c| c.enable_app_ack = true);
        bus.send_to(&PEER, b"need-ack", SendTimeout::Default);
        let t = now(&bus);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);
        // A duplicate completion while awaiting the ack must not retire
        // or double-complete the frame.
        bus.handle_tx_status(true, t);
        bus.handle_tx_status(false, t);
        assert!(bus.current_tx.is_some());
        assert_eq!(statuses.lock().unwrap().as_slice(), &[SendStatus::Queued]);
    }

    #[test]
    fn pool_accounting_matches_live_frames() {
        let (mut bus, _) = test_bus(|c| c.queue_len = 4);
        bus.send_to(&PEER, b"a", SendTimeout::Default);
        bus.send_to(&PEER, b"b", SendTimeout::Default);
        bus.send_to(&PEER, b"c", SendTimeout::Default);
        assert_eq!(bus.pool.busy_count(), 3);
        let t = now(&bus);
        bus.handle_timer(t);
        // One in flight, two queued.
        assert_eq!(bus.pool.busy_count(), 3);
        bus.handle_tx_status(true, t);
        assert_eq!(bus.pool.busy_count(), 2);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);
        bus.handle_timer(t);
        bus.handle_tx_status(true, t);
        assert_eq!(bus.pool.busy_count(), 0);
    }
}
