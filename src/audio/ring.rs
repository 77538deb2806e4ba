//! Timestamped output sample ring.
//!
//! Fixed-capacity circular store of interleaved-stereo sample blocks with a
//! parallel per-slot timestamp array. The frame-ingestion path is the only
//! producer and the block-complete driver is the only consumer; the indices
//! are atomics and there are no locks, so the consumer can never be stalled
//! by the producer.
//!
//! # SPSC discipline
//!
//! Exactly one context may call the producer-side methods (`write_block_at`,
//! `write_silence_at`, `publish_prod`, `retreat_prod`) and exactly one other
//! context the consumer-side methods (`try_advance_cons`, `read_block_into`,
//! `slot_timestamp`). The producer only writes slots the consumer has not
//! claimed and the consumer only reads slots behind the published producer
//! index. Adding a second producer or consumer requires real
//! synchronization and is not supported.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{BridgeError, Result};

pub struct SampleRing {
    num_blocks: usize,
    block_samples: usize,
    samples: UnsafeCell<Box<[i16]>>,
    stamps: UnsafeCell<Box<[u32]>>,
    prod: AtomicUsize,
    cons: AtomicUsize,
}

// Safe under the single-producer/single-consumer discipline documented on
// the type: slot payloads are only touched on one side of the published
// index boundary at a time.
unsafe impl Sync for SampleRing {}
unsafe impl Send for SampleRing {}

impl SampleRing {
    /// Create a ring of `num_blocks` blocks of `block_samples` interleaved
    /// stereo samples each, zero-filled, both indices at zero.
    pub fn new(num_blocks: usize, block_samples: usize) -> Result<Self> {
        if num_blocks < 2 || block_samples == 0 {
            return Err(BridgeError::Config(
                "ring needs at least two blocks of nonzero size".to_string(),
            ));
        }
        Ok(Self {
            num_blocks,
            block_samples,
            samples: UnsafeCell::new(vec![0i16; num_blocks * block_samples].into_boxed_slice()),
            stamps: UnsafeCell::new(vec![0u32; num_blocks].into_boxed_slice()),
            prod: AtomicUsize::new(0),
            cons: AtomicUsize::new(0),
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// Next slot index, modulo capacity.
    #[inline]
    pub fn next_idx(&self, idx: usize) -> usize {
        (idx + 1) % self.num_blocks
    }

    /// Previous slot index, modulo capacity.
    #[inline]
    pub fn prev_idx(&self, idx: usize) -> usize {
        (idx + self.num_blocks - 1) % self.num_blocks
    }

    pub fn prod_idx(&self) -> usize {
        self.prod.load(Ordering::Acquire)
    }

    pub fn cons_idx(&self) -> usize {
        self.cons.load(Ordering::Acquire)
    }

    /// Blocks between consumer and producer, modulo capacity.
    pub fn distance(&self) -> usize {
        (self.prod_idx() + self.num_blocks - self.cons_idx()) % self.num_blocks
    }

    /// Producer: copy one block into `idx` and stamp it.
    ///
    /// `samples.len()` must equal the block size. The write only becomes
    /// visible to the consumer once `publish_prod` moves the index past it.
    pub fn write_block_at(&self, idx: usize, samples: &[i16], ts_us: u32) {
        debug_assert!(idx < self.num_blocks);
        debug_assert_eq!(samples.len(), self.block_samples);
        unsafe {
            let base = (*self.samples.get())
                .as_mut_ptr()
                .add(idx * self.block_samples);
            std::ptr::copy_nonoverlapping(samples.as_ptr(), base, self.block_samples);
            (*self.stamps.get())[idx] = ts_us;
        }
    }

    /// Producer: fill one block with silence and stamp it.
    pub fn write_silence_at(&self, idx: usize, ts_us: u32) {
        debug_assert!(idx < self.num_blocks);
        unsafe {
            let base = (*self.samples.get())
                .as_mut_ptr()
                .add(idx * self.block_samples);
            std::ptr::write_bytes(base, 0, self.block_samples);
            (*self.stamps.get())[idx] = ts_us;
        }
    }

    /// Producer: publish a new producer index, releasing all slot writes
    /// made before it.
    pub fn publish_prod(&self, idx: usize) {
        debug_assert!(idx < self.num_blocks);
        self.prod.store(idx, Ordering::Release);
    }

    /// Producer: roll the producer index back `n` slots, dropping the
    /// newest blocks without touching their content.
    pub fn retreat_prod(&self, n: usize) {
        let mut idx = self.prod.load(Ordering::Relaxed);
        for _ in 0..n {
            idx = self.prev_idx(idx);
        }
        self.prod.store(idx, Ordering::Release);
    }

    /// Consumer: timestamp of the slot at `idx`.
    pub fn slot_timestamp(&self, idx: usize) -> u32 {
        debug_assert!(idx < self.num_blocks);
        unsafe { (*self.stamps.get())[idx] }
    }

    /// Consumer: advance to the next slot unless that would collide with
    /// the producer. Returns the slot to play and whether the index moved;
    /// `false` means the current block repeats (underrun).
    pub fn try_advance_cons(&self) -> (usize, bool) {
        let cur = self.cons.load(Ordering::Relaxed);
        let next = self.next_idx(cur);
        if next != self.prod.load(Ordering::Acquire) {
            self.cons.store(next, Ordering::Release);
            (next, true)
        } else {
            (cur, false)
        }
    }

    /// Consumer: copy the block at `idx` out.
    pub fn read_block_into(&self, idx: usize, out: &mut [i16]) {
        debug_assert!(idx < self.num_blocks);
        debug_assert_eq!(out.len(), self.block_samples);
        unsafe {
            let base = (*self.samples.get()).as_ptr().add(idx * self.block_samples);
            std::ptr::copy_nonoverlapping(base, out.as_mut_ptr(), self.block_samples);
        }
    }

    /// Rewind the consumer index one slot. Start-up priming only, before
    /// the consumer context is running.
    pub fn rewind_cons(&self) {
        let idx = self.prev_idx(self.cons.load(Ordering::Relaxed));
        self.cons.store(idx, Ordering::Release);
    }

    /// Zero all payloads and timestamps and reset both indices.
    ///
    /// Only legal while no consumer context is running (stream stopped).
    pub fn reset(&self) {
        unsafe {
            (*self.samples.get()).fill(0);
            (*self.stamps.get()).fill(0);
        }
        self.prod.store(0, Ordering::Release);
        self.cons.store(0, Ordering::Release);
    }
}
