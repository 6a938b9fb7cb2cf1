//! Preallocated transmit buffer pool.
//!
//! One flat region of `count x buf_len` bytes plus a busy flag per buffer,
//! allocated once at startup. The pool is sized to the transmit queue, so a
//! full queue and an exhausted pool coincide. Indices are handed out by a
//! first-fit scan; `free` tolerates repeated and out-of-range indices so a
//! double release can never corrupt another buffer.

use alloc::vec;
use alloc::vec::Vec;

/// Index of a pool buffer, owned by exactly one transmit descriptor.
pub type BufferIndex = u16;

pub struct BufferPool {
    data: Vec<u8>,
    busy: Vec<bool>,
    buf_len: usize,
}

impl BufferPool {
    pub fn new(count: usize, buf_len: usize) -> Self {
        BufferPool {
            data: vec![0u8; count * buf_len],
            busy: vec![false; count],
            buf_len,
        }
    }

    /// Claim a free buffer, or `None` when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<BufferIndex> {
        for (i, used) in self.busy.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Some(i as BufferIndex);
            }
        }
        None
    }

    /// Release a buffer. Out-of-range indices are ignored and repeated
    /// frees are harmless.
    pub fn free(&mut self, index: BufferIndex) {
        if let Some(used) = self.busy.get_mut(usize::from(index)) {
            *used = false;
        }
    }

    pub fn buffer(&self, index: BufferIndex) -> &[u8] {
        let start = usize::from(index) * self.buf_len;
        &self.data[start..start + self.buf_len]
    }

    pub fn buffer_mut(&mut self, index: BufferIndex) -> &mut [u8] {
        let start = usize::from(index) * self.buf_len;
        &mut self.data[start..start + self.buf_len]
    }

    /// Number of buffers currently claimed.
    pub fn busy_count(&self) -> usize {
        self.busy.iter().filter(|b| **b).count()
    }

    pub fn capacity(&self) -> usize {
        self.busy.len()
    }

    pub fn buf_len(&self) -> usize {
        self.buf_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_hands_out_distinct_buffers() {
        let mut pool = BufferPool::new(3, 16);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.busy_count(), 3);
        assert_eq!(pool.alloc(), None);
    }

    #[test]
    fn free_recycles_lowest_first() {
        let mut pool = BufferPool::new(2, 8);
        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        pool.free(a);
        assert_eq!(pool.alloc(), Some(a));
    }

    #[test]
    fn free_is_idempotent_and_range_checked() {
        let mut pool = BufferPool::new(2, 8);
        let a = pool.alloc().unwrap();
        pool.free(a);
        pool.free(a);
        pool.free(999);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn buffers_do_not_overlap() {
        let mut pool = BufferPool::new(2, 8);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        pool.buffer_mut(a).fill(0xAA);
        pool.buffer_mut(b).fill(0xBB);
        assert!(pool.buffer(a).iter().all(|&x| x == 0xAA));
        assert!(pool.buffer(b).iter().all(|&x| x == 0xBB));
    }
}
