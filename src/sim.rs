//! Deterministic stand-ins for the hardware collaborators.
//!
//! Everything here runs on a simulated microsecond timeline owned by the
//! caller: tests and the link simulator advance [`SimClock`] by hand and
//! drive block completions through [`LoopExchange::tick`], so a whole
//! locking sequence runs in microseconds of wall time and is exactly
//! reproducible.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::datapath::BlockDriver;
use crate::error::{BridgeError, Result};
use crate::hal::{AudioClock, BlockExchange, Codec, PrimedBlocks};
use crate::sync::drift::DriftState;
use crate::timing::MonotonicClock;

/// Manually advanced microsecond clock. Clones share the same timeline.
#[derive(Clone)]
pub struct SimClock {
    now: Arc<AtomicU32>,
}

impl SimClock {
    pub fn new(start_us: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_us)),
        }
    }

    pub fn set(&self, now_us: u32) {
        self.now.store(now_us, Ordering::Relaxed);
    }

    pub fn advance(&self, delta_us: u32) {
        self.now.fetch_add(delta_us, Ordering::Relaxed);
    }
}

impl MonotonicClock for SimClock {
    fn now_us(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Tunable-clock stand-in that just records the trim. Clones share the
/// value, so the simulator can feed the applied trim back into its
/// oscillator model.
#[derive(Clone)]
pub struct SharedTrim {
    freq: Arc<AtomicU32>,
}

impl SharedTrim {
    pub fn new(initial: u16) -> Self {
        Self {
            freq: Arc::new(AtomicU32::new(initial as u32)),
        }
    }

    pub fn get(&self) -> u16 {
        self.freq.load(Ordering::Relaxed) as u16
    }
}

impl AudioClock for SharedTrim {
    fn set_trim(&mut self, freq: u16) {
        self.freq.store(freq as u32, Ordering::Relaxed);
    }
}

/// Transparent codec: frames are little-endian interleaved i16 PCM.
pub struct PcmCodec;

impl Codec for PcmCodec {
    fn decode(&mut self, frame: &[u8], bad_frame: bool, pcm_out: &mut [i16]) -> Result<usize> {
        if bad_frame {
            // Concealment: silence.
            pcm_out.fill(0);
            return Ok(pcm_out.len());
        }
        if frame.len() != pcm_out.len() * 2 {
            return Err(BridgeError::Codec(format!(
                "frame size {} does not decode to {} samples",
                frame.len(),
                pcm_out.len()
            )));
        }
        for (sample, bytes) in pcm_out.iter_mut().zip(frame.chunks_exact(2)) {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }
        Ok(pcm_out.len())
    }

    fn encode(&mut self, pcm: &[i16], frame_out: &mut [u8]) -> Result<usize> {
        if frame_out.len() < pcm.len() * 2 {
            return Err(BridgeError::Codec(format!(
                "frame buffer {} too small for {} samples",
                frame_out.len(),
                pcm.len()
            )));
        }
        for (sample, bytes) in pcm.iter().zip(frame_out.chunks_exact_mut(2)) {
            bytes.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(pcm.len() * 2)
    }
}

struct LoopState {
    driver: Option<BlockDriver>,
    pending_capture: VecDeque<crate::audio::fifo::FifoSlot>,
}

/// In-process block exchange: the caller is the "hardware" and fires block
/// completions by calling [`tick`](Self::tick). Capture slots cycle
/// through a small pending queue the way a double-buffered peripheral
/// holds them.
#[derive(Clone)]
pub struct LoopExchange {
    state: Arc<Mutex<LoopState>>,
}

impl LoopExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState {
                driver: None,
                pending_capture: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().expect("loop exchange mutex poisoned")
    }

    /// Complete one block period at `ts_us` and return the samples the
    /// datapath scheduled for playback.
    pub fn tick(&self, ts_us: u32) -> Result<Vec<i16>> {
        let mut state = self.lock();
        let captured = state.pending_capture.pop_front();
        let driver = state
            .driver
            .as_mut()
            .ok_or(BridgeError::AlreadyStopped)?;
        let blocks = driver.block_complete(ts_us, captured)?;
        let playback = blocks.playback.to_vec();
        let capture = blocks.capture;
        state.pending_capture.push_back(capture);
        Ok(playback)
    }

    pub fn drift_state(&self) -> Option<DriftState> {
        self.lock().driver.as_ref().map(|d| d.drift_state())
    }
}

impl Default for LoopExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockExchange for LoopExchange {
    fn start(&mut self, driver: BlockDriver, primed: PrimedBlocks) -> Result<()> {
        let mut state = self.lock();
        if state.driver.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }
        state.pending_capture.clear();
        let [a, b] = primed.capture;
        state.pending_capture.push_back(a);
        state.pending_capture.push_back(b);
        state.driver = Some(driver);
        Ok(())
    }

    fn stop(&mut self) -> Result<BlockDriver> {
        let mut state = self.lock();
        state.pending_capture.clear();
        state.driver.take().ok_or(BridgeError::AlreadyStopped)
    }
}
