//! Broadcast replay protection.
//!
//! Each broadcast source gets a sliding window over its 16-bit sequence
//! space: `base` is the newest accepted sequence and a bitmap records which
//! of the `window` sequences just behind it have been seen. Sources are
//! tracked in a bounded table evicted least-recently-used, separate from
//! the peer table so broadcasts from non-peers are still filtered.

use hashbrown::HashMap;

use crate::time::Timestamp;
use crate::types::{Mac, MAX_REPLAY_WINDOW};

/// Replay state for one broadcast source.
#[derive(Debug, Clone, Copy)]
struct SenderWindow {
    base: u16,
    bitmap: u32,
    last_used: Timestamp,
}

/// Decide whether sequence `seq` is fresh, updating the window state.
///
/// `window` is the lookback depth in sequence numbers (at most 32). The
/// distance is computed modulo 2^16, so counter wrap and sender reseeds
/// appear as a large forward jump: the first post-jump frame is accepted
/// and the bitmap restarts, deliberately forgetting pre-jump history.
pub fn accept_seq(base: &mut u16, bitmap: &mut u32, window: u16, seq: u16) -> bool {
    let window = window.min(MAX_REPLAY_WINDOW);
    let dist = seq.wrapping_sub(*base);
    if dist == 0 {
        return false;
    }
    if dist <= window {
        let bit = 1u32 << (dist - 1);
        if *bitmap & bit != 0 {
            return false;
        }
        *bitmap |= bit;
        return true;
    }
    // Advance: dist exceeds the window, so every recorded offset is now
    // behind the new base. A shift by dist-1 >= window saturates the whole
    // bitmap away; the fresh base alone carries the duplicate check.
    *bitmap = 0;
    *base = seq;
    true
}

/// Bounded LRU table of per-source windows.
pub struct SenderTable {
    windows: HashMap<Mac, SenderWindow>,
    max_senders: usize,
}

impl SenderTable {
    pub fn new(max_senders: usize) -> Self {
        SenderTable {
            windows: HashMap::with_capacity(max_senders),
            max_senders,
        }
    }

    /// Run the window check for `seq` from `mac`. A `window` of zero
    /// disables filtering entirely.
    pub fn accept(&mut self, mac: &Mac, seq: u16, window: u16, now: Timestamp) -> bool {
        if window == 0 {
            return true;
        }
        if !self.windows.contains_key(mac) {
            if self.windows.len() >= self.max_senders {
                self.evict_oldest();
            }
            self.windows.insert(
                *mac,
                SenderWindow {
                    base: 0,
                    bitmap: 0,
                    last_used: now,
                },
            );
        }
        // Entry exists by construction above.
        let Some(state) = self.windows.get_mut(mac) else {
            return true;
        };
        state.last_used = now;
        accept_seq(&mut state.base, &mut state.bitmap, window, seq)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .windows
            .iter()
            .min_by_key(|(_, w)| w.last_used)
            .map(|(mac, _)| *mac)
        {
            self.windows.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (u16, u32) {
        (0, 0)
    }

    #[test]
    fn base_repeat_is_rejected() {
        let (mut base, mut bitmap) = (100u16, 0u32);
        assert!(!accept_seq(&mut base, &mut bitmap, 16, 100));
    }

    #[test]
    fn sequential_broadcasts_all_accepted() {
        let (mut base, mut bitmap) = fresh();
        assert!(accept_seq(&mut base, &mut bitmap, 16, 100));
        assert_eq!(base, 100);
        // In-window successors accept without moving the base.
        assert!(accept_seq(&mut base, &mut bitmap, 16, 101));
        assert!(accept_seq(&mut base, &mut bitmap, 16, 102));
        assert_eq!(base, 100);
        assert_eq!(bitmap, 0b11);
    }

    #[test]
    fn in_window_reorder_accepted_once() {
        let (mut base, mut bitmap) = fresh();
        assert!(accept_seq(&mut base, &mut bitmap, 16, 100));
        assert!(accept_seq(&mut base, &mut bitmap, 16, 102));
        // 101 arrives late: inside the window, not yet seen.
        assert!(accept_seq(&mut base, &mut bitmap, 16, 101));
        // A replay of it is not.
        assert!(!accept_seq(&mut base, &mut bitmap, 16, 101));
        // Neither is a replay of an already-advanced-past base.
        assert!(!accept_seq(&mut base, &mut bitmap, 16, 102));
    }

    #[test]
    fn within_window_bit_positions() {
        let (mut base, mut bitmap) = fresh();
        assert!(accept_seq(&mut base, &mut bitmap, 8, 50));
        // dist == window is still inside the window.
        assert!(accept_seq(&mut base, &mut bitmap, 8, 58));
        assert_eq!(base, 58);
        assert!(accept_seq(&mut base, &mut bitmap, 8, 51));
        assert!(!accept_seq(&mut base, &mut bitmap, 8, 51));
    }

    #[test]
    fn behind_window_looks_like_wraparound_jump() {
        // dist is computed mod 2^16, so "too old" becomes a huge forward
        // distance and resets the window onto the stale sequence. The
        // stale frame is accepted once; history before the jump is gone.
        let (mut base, mut bitmap) = fresh();
        assert!(accept_seq(&mut base, &mut bitmap, 16, 1000));
        assert!(accept_seq(&mut base, &mut bitmap, 16, 900));
        assert_eq!(base, 900);
    }

    #[test]
    fn large_jump_clears_history() {
        let (mut base, mut bitmap) = fresh();
        for seq in 1..=10u16 {
            assert!(accept_seq(&mut base, &mut bitmap, 16, seq));
        }
        // Sender reseeded; first post-jump frame accepted, bitmap restarts.
        assert!(accept_seq(&mut base, &mut bitmap, 16, 5000));
        assert_eq!(base, 5000);
        assert_eq!(bitmap, 0);
        // Old in-window sequences relative to the new base are unknown.
        assert!(accept_seq(&mut base, &mut bitmap, 16, 4999));
    }

    #[test]
    fn wraparound_across_u16_boundary() {
        let (mut base, mut bitmap) = (0xFFFEu16, 0u32);
        assert!(accept_seq(&mut base, &mut bitmap, 16, 0xFFFF));
        assert!(accept_seq(&mut base, &mut bitmap, 16, 0x0000));
        assert!(accept_seq(&mut base, &mut bitmap, 16, 0x0001));
        assert!(!accept_seq(&mut base, &mut bitmap, 16, 0xFFFF));
        assert!(!accept_seq(&mut base, &mut bitmap, 16, 0x0000));
    }

    #[test]
    fn window_clipped_to_bitmap_width() {
        let (mut base, mut bitmap) = fresh();
        assert!(accept_seq(&mut base, &mut bitmap, 999, 100));
        // Requested window beyond 32 behaves as 32: dist 33 is an advance.
        assert!(accept_seq(&mut base, &mut bitmap, 999, 133));
        assert_eq!(base, 133);
    }

    #[test]
    fn table_tracks_sources_independently() {
        let mut table = SenderTable::new(4);
        let a: Mac = [0xA; 6];
        let b: Mac = [0xB; 6];
        assert!(table.accept(&a, 10, 16, Timestamp::ZERO));
        assert!(table.accept(&b, 10, 16, Timestamp::ZERO));
        assert!(!table.accept(&a, 10, 16, Timestamp::ZERO));
        assert!(!table.accept(&b, 10, 16, Timestamp::ZERO));
    }

    #[test]
    fn zero_window_disables_filtering() {
        let mut table = SenderTable::new(4);
        let a: Mac = [0xA; 6];
        assert!(table.accept(&a, 10, 0, Timestamp::ZERO));
        assert!(table.accept(&a, 10, 0, Timestamp::ZERO));
        assert!(table.is_empty());
    }

    #[test]
    fn lru_eviction_forgets_the_quietest_source() {
        let mut table = SenderTable::new(2);
        let a: Mac = [0xA; 6];
        let b: Mac = [0xB; 6];
        let c: Mac = [0xC; 6];
        assert!(table.accept(&a, 1, 16, Timestamp::from_millis(10)));
        assert!(table.accept(&b, 1, 16, Timestamp::from_millis(20)));
        // Third source evicts A, the least recently used.
        assert!(table.accept(&c, 1, 16, Timestamp::from_millis(30)));
        assert_eq!(table.len(), 2);
        // A's replay history is gone: the same seq is accepted again.
        assert!(table.accept(&a, 1, 16, Timestamp::from_millis(40)));
    }
}
