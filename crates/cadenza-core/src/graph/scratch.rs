//! Per-thread scratch buffer pool
//!
//! Render paths rent zeroed buffers keyed by power-of-two capacity from a
//! thread-local free list; the RAII guard returns the allocation on every
//! exit path. After warm-up a callback of any depth reuses the same
//! allocations block after block.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use crate::dsp::next_power_of_two;
use crate::types::Sample;

/// Free buffers bucketed by log2 capacity (up to 2^24 samples)
const BUCKETS: usize = 25;

thread_local! {
    static POOL: RefCell<[Vec<Vec<Sample>>; BUCKETS]> =
        RefCell::new(std::array::from_fn(|_| Vec::new()));
}

#[inline]
fn bucket_index(capacity: usize) -> usize {
    (next_power_of_two(capacity.max(1)).trailing_zeros() as usize).min(BUCKETS - 1)
}

/// A rented, zeroed scratch buffer; returns to the pool on drop
pub struct ScratchBuffer {
    data: Vec<Sample>,
}

impl ScratchBuffer {
    /// Rent a zeroed buffer of exactly `len` samples
    pub fn rent(len: usize) -> Self {
        let bucket = bucket_index(len);
        let mut data = POOL
            .with(|pool| pool.borrow_mut()[bucket].pop())
            .unwrap_or_else(|| Vec::with_capacity(next_power_of_two(len.max(1))));
        data.clear();
        data.resize(len, 0.0);
        Self { data }
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if data.capacity() == 0 {
            return;
        }
        let bucket = bucket_index(data.capacity());
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            // Keep the free list small per bucket
            if pool[bucket].len() < 8 {
                pool[bucket].push(data);
            }
        });
    }
}

impl Deref for ScratchBuffer {
    type Target = [Sample];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_is_zeroed() {
        {
            let mut b = ScratchBuffer::rent(64);
            b.iter_mut().for_each(|s| *s = 1.0);
        }
        // The dirtied buffer comes back zeroed
        let b = ScratchBuffer::rent(64);
        assert!(b.iter().all(|&s| s == 0.0));
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn test_reuse_same_allocation() {
        let ptr = {
            let b = ScratchBuffer::rent(100);
            b.as_ptr()
        };
        let b = ScratchBuffer::rent(100);
        assert_eq!(b.as_ptr(), ptr);
    }

    #[test]
    fn test_different_sizes_share_pow2_bucket() {
        let b1 = ScratchBuffer::rent(100);
        assert!(b1.data.capacity() >= 128);
        drop(b1);
        let b2 = ScratchBuffer::rent(128);
        assert_eq!(b2.len(), 128);
    }
}
