//! Generic block FIFO for the capture path.
//!
//! A fixed pool of byte blocks cycles through four stations: free pool,
//! producer writing, ready queue, consumer reading. A slot is exclusively
//! owned by whichever side currently holds its [`FifoSlot`]; the
//! exactly-once release rule is enforced by ownership rather than
//! discipline.
//!
//! The pool and the ready queue are bounded crossbeam channels of equal
//! capacity, so a ready-queue push can only fail if the accounting is
//! already corrupt — that case is fatal, not recoverable. The only lock is
//! a short mutex keeping the (allocated, ready) counters coherent when
//! read together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use crate::error::{BridgeError, Result};

/// How long a FIFO operation may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately if nothing is available.
    None,
    /// Block until something is available.
    Forever,
    /// Block up to the given duration.
    Timeout(Duration),
}

/// One pool block, exclusively owned by the holder.
#[derive(Debug)]
pub struct FifoSlot {
    buf: Vec<u8>,
}

impl FifoSlot {
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Capacity of the slot, equal to the FIFO's block size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Error from [`BlockFifo::commit`]; hands the slot back so the producer
/// can retry or release it, leaving FIFO state untouched.
#[derive(Debug)]
pub struct CommitError {
    pub slot: FifoSlot,
    pub error: BridgeError,
}

#[derive(Debug, Default)]
struct Counters {
    allocated: u32,
    ready: u32,
}

/// Fixed-capacity producer/consumer block queue backed by a memory pool.
///
/// Cloning yields another handle to the same FIFO; the capture path clones
/// one handle into the block-complete driver and keeps another for the
/// wireless-send consumer.
#[derive(Clone)]
pub struct BlockFifo {
    block_size: usize,
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    ready_tx: Sender<(Vec<u8>, usize)>,
    ready_rx: Receiver<(Vec<u8>, usize)>,
    counters: Arc<Mutex<Counters>>,
}

impl BlockFifo {
    /// Create a FIFO of `capacity` blocks of `block_size` bytes each.
    pub fn new(capacity: usize, block_size: usize) -> Result<Self> {
        if capacity == 0 || block_size == 0 {
            return Err(BridgeError::Config(
                "FIFO capacity and block size must be nonzero".to_string(),
            ));
        }

        let (free_tx, free_rx) = bounded(capacity);
        let (ready_tx, ready_rx) = bounded(capacity);

        for _ in 0..capacity {
            // Freshly built and bounded to capacity, cannot fail.
            free_tx
                .send(vec![0u8; block_size])
                .map_err(|_| BridgeError::FifoAccounting("pool prefill failed".to_string()))?;
        }

        Ok(Self {
            block_size,
            free_tx,
            free_rx,
            ready_tx,
            ready_rx,
            counters: Arc::new(Mutex::new(Counters::default())),
        })
    }

    /// Reserve a free block from the pool for writing.
    ///
    /// An exhausted pool is a normal producer-side condition
    /// ([`BridgeError::PoolExhausted`] / [`BridgeError::Timeout`]), distinct
    /// from the consumer-side empty queue, so callers can apply
    /// backpressure instead of failing.
    pub fn acquire(&self, wait: Wait) -> Result<FifoSlot> {
        let buf = match wait {
            Wait::None => self.free_rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => BridgeError::PoolExhausted,
                TryRecvError::Disconnected => disconnected(),
            })?,
            Wait::Forever => self.free_rx.recv().map_err(|_| disconnected())?,
            Wait::Timeout(d) => self.free_rx.recv_timeout(d).map_err(|e| match e {
                RecvTimeoutError::Timeout => BridgeError::Timeout,
                RecvTimeoutError::Disconnected => disconnected(),
            })?,
        };

        self.counters
            .lock()
            .expect("FIFO counter mutex poisoned")
            .allocated += 1;
        Ok(FifoSlot { buf })
    }

    /// Move a written slot into the ready queue.
    ///
    /// `size` must be in `1..=block_size`; violations return the slot
    /// without mutating the FIFO. A full ready queue here means the
    /// pool/queue accounting is corrupt and is returned as a fatal
    /// [`BridgeError::FifoAccounting`].
    pub fn commit(&self, slot: FifoSlot, size: usize) -> std::result::Result<(), CommitError> {
        if size == 0 {
            return Err(CommitError {
                slot,
                error: BridgeError::InvalidArgument("commit size is zero".to_string()),
            });
        }
        if size > self.block_size {
            return Err(CommitError {
                slot,
                error: BridgeError::InvalidArgument(format!(
                    "commit size {} exceeds block size {}",
                    size, self.block_size
                )),
            });
        }

        // Counted before the send: the matching take decrements only after
        // its recv, which cannot happen before the send, so the ready
        // counter never underflows.
        self.counters
            .lock()
            .expect("FIFO counter mutex poisoned")
            .ready += 1;

        match self.ready_tx.try_send((slot.buf, size)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.counters
                    .lock()
                    .expect("FIFO counter mutex poisoned")
                    .ready -= 1;
                // More ready entries than pool blocks: invariant violation.
                let buf = e.into_inner().0;
                log::error!("Ready queue rejected a pooled block");
                Err(CommitError {
                    slot: FifoSlot { buf },
                    error: BridgeError::FifoAccounting(
                        "ready queue full while pool allocation succeeded".to_string(),
                    ),
                })
            }
        }
    }

    /// Pop the oldest ready slot and the committed size.
    pub fn take(&self, wait: Wait) -> Result<(FifoSlot, usize)> {
        let (buf, size) = match wait {
            Wait::None => self.ready_rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => BridgeError::Empty,
                TryRecvError::Disconnected => disconnected(),
            })?,
            Wait::Forever => self.ready_rx.recv().map_err(|_| disconnected())?,
            Wait::Timeout(d) => self.ready_rx.recv_timeout(d).map_err(|e| match e {
                RecvTimeoutError::Timeout => BridgeError::Timeout,
                RecvTimeoutError::Disconnected => disconnected(),
            })?,
        };

        self.counters
            .lock()
            .expect("FIFO counter mutex poisoned")
            .ready -= 1;
        Ok((FifoSlot { buf }, size))
    }

    /// Return a slot to the free pool.
    pub fn release(&self, slot: FifoSlot) -> Result<()> {
        self.free_tx
            .try_send(slot.buf)
            .map_err(|_| BridgeError::FifoAccounting("free pool overflow on release".to_string()))?;
        self.counters
            .lock()
            .expect("FIFO counter mutex poisoned")
            .allocated -= 1;
        Ok(())
    }

    /// Diagnostic counters: `(allocated, ready)`.
    ///
    /// `ready <= allocated` must always hold; a violation is reported as a
    /// consistency error, never silently corrected.
    pub fn used(&self) -> Result<(u32, u32)> {
        let counters = self.counters.lock().expect("FIFO counter mutex poisoned");
        let (allocated, ready) = (counters.allocated, counters.ready);
        drop(counters);

        if ready > allocated {
            log::error!("{ready} ready entries cannot exceed {allocated} allocated blocks");
            return Err(BridgeError::FifoAccounting(format!(
                "ready count {ready} exceeds allocated count {allocated}"
            )));
        }
        Ok((allocated, ready))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

fn disconnected() -> BridgeError {
    BridgeError::FifoAccounting("FIFO channel disconnected".to_string())
}
