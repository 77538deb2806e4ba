//! Datapath orchestrator.
//!
//! Terminology, inherited from the wire side down:
//!   - sample: signed integer of audio waveform amplitude
//!   - block: set of raw samples exchanged with the hardware per period
//!   - frame: encoded audio packet exchanged with the wireless transport
//!
//! Two execution contexts touch the shared state. The frame-ingestion path
//! ([`Datapath::stream_out`]) runs at frame rate in the application
//! context and is the only producer of the output ring. The block-complete
//! path ([`BlockDriver::block_complete`]) runs at block rate in the
//! hardware's bounded-latency context and is the only consumer. Everything
//! they share beyond the ring itself is a handful of scalar trackers kept
//! in atomics; there is no lock anywhere the consumer can block on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::audio::fifo::{BlockFifo, FifoSlot, Wait};
use crate::audio::ring::SampleRing;
use crate::config::DatapathConfig;
use crate::error::{BridgeError, Result};
use crate::hal::{AudioClock, BlockExchange, Codec, ExchangedBlocks, PrimedBlocks};
use crate::sync::drift::DriftCompensator;
use crate::sync::pres::PresentationCompensator;
use crate::timing::{MonotonicClock, elapsed_us};

/// Cross-context scalar trackers.
///
/// Written on one side, read on the other; each is independently atomic
/// and none requires coherence with the others beyond what the ring's
/// index ordering already provides.
struct Trackers {
    remote_valid: AtomicBool,
    remote_last_ts_us: AtomicU32,
    local_last_ts_us: AtomicU32,
    meas_pres_dly_us: AtomicU32,
    drift_locked: AtomicBool,

    total_frames: AtomicU32,
    total_prod_blocks: AtomicU32,
    total_cons_blocks: AtomicU32,
    total_underruns: AtomicU32,
}

impl Trackers {
    fn new() -> Self {
        Self {
            remote_valid: AtomicBool::new(false),
            remote_last_ts_us: AtomicU32::new(0),
            local_last_ts_us: AtomicU32::new(0),
            meas_pres_dly_us: AtomicU32::new(0),
            drift_locked: AtomicBool::new(false),
            total_frames: AtomicU32::new(0),
            total_prod_blocks: AtomicU32::new(0),
            total_cons_blocks: AtomicU32::new(0),
            total_underruns: AtomicU32::new(0),
        }
    }

    fn remote(&self) -> Option<u32> {
        if self.remote_valid.load(Ordering::Acquire) {
            Some(self.remote_last_ts_us.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn set_remote(&self, ts_us: u32) {
        self.remote_last_ts_us.store(ts_us, Ordering::Relaxed);
        self.remote_valid.store(true, Ordering::Release);
    }

    fn clear_remote(&self) {
        self.remote_valid.store(false, Ordering::Release);
    }

    fn reset_output(&self) {
        self.meas_pres_dly_us.store(0, Ordering::Relaxed);
        self.total_frames.store(0, Ordering::Relaxed);
        self.total_prod_blocks.store(0, Ordering::Relaxed);
        self.total_cons_blocks.store(0, Ordering::Relaxed);
        self.total_underruns.store(0, Ordering::Relaxed);
    }
}

/// Statistics snapshot of the running stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatapathStats {
    pub total_frames: u32,
    pub total_prod_blocks: u32,
    pub total_cons_blocks: u32,
    pub total_underruns: u32,
}

/// Consumer half of the datapath, driven by the hardware block exchange.
///
/// Handed to [`BlockExchange::start`] and invoked once per block period.
/// Returned by [`BlockExchange::stop`] so the compensation state survives
/// a stop/start cycle.
pub struct BlockDriver {
    ring: Arc<SampleRing>,
    trackers: Arc<Trackers>,
    drift: DriftCompensator,
    trim: Box<dyn AudioClock>,
    capture: BlockFifo,
    playback: Vec<i16>,
    underrun_condition: bool,
    capture_overrun: bool,
}

impl BlockDriver {
    fn new(
        ring: Arc<SampleRing>,
        trackers: Arc<Trackers>,
        drift: DriftCompensator,
        trim: Box<dyn AudioClock>,
        capture: BlockFifo,
    ) -> Self {
        let block_samples = ring.block_samples();
        Self {
            ring,
            trackers,
            drift,
            trim,
            capture,
            playback: vec![0i16; block_samples],
            underrun_condition: false,
            capture_overrun: false,
        }
    }

    fn into_parts(self) -> (DriftCompensator, Box<dyn AudioClock>) {
        (self.drift, self.trim)
    }

    /// One block period elapsed: hand the hardware its next buffer pair.
    ///
    /// `ts_us` is the local timestamp latched at the block boundary;
    /// `captured` is the slot the hardware just filled (`None` on the
    /// first invocation, before any capture completed). Errors from this
    /// method are fatal accounting failures; every transient condition is
    /// absorbed and logged here.
    pub fn block_complete(
        &mut self,
        ts_us: u32,
        captured: Option<FifoSlot>,
    ) -> Result<ExchangedBlocks<'_>> {
        // Presentation delay of the block about to play.
        let cons = self.ring.cons_idx();
        let measured = elapsed_us(ts_us, self.ring.slot_timestamp(cons));
        self.trackers
            .meas_pres_dly_us
            .store(measured, Ordering::Relaxed);

        // Playback: advance if the producer left us a block, else repeat
        // the current one.
        let (play_idx, advanced) = self.ring.try_advance_cons();
        if advanced {
            self.trackers
                .total_cons_blocks
                .fetch_add(1, Ordering::Relaxed);
            if self.underrun_condition {
                self.underrun_condition = false;
                log::warn!(
                    "Data received, total underruns: {}",
                    self.trackers.total_underruns.load(Ordering::Relaxed)
                );
            }
        } else if self.trackers.remote().is_some() {
            // Repeating a block. Not worth reporting before the stream
            // has delivered anything.
            let total = self.trackers.total_underruns.fetch_add(1, Ordering::Relaxed);
            if !self.underrun_condition || total % 1000 == 0 {
                log::warn!("Output underrun condition, total: {total}");
            }
            self.underrun_condition = true;
        }
        self.ring.read_block_into(play_idx, &mut self.playback);

        // Capture: queue the block the hardware just filled.
        if let Some(slot) = captured {
            let size = slot.capacity();
            self.capture.commit(slot, size).map_err(|e| e.error)?;
        }

        // Next empty capture slot; when the pool is dry, drop the oldest
        // ready block so capture keeps rolling.
        let slot = match self.capture.acquire(Wait::None) {
            Ok(slot) => {
                if self.capture_overrun {
                    self.capture_overrun = false;
                    log::warn!("Capture continuing stream");
                }
                slot
            }
            Err(BridgeError::PoolExhausted) => {
                if !self.capture_overrun {
                    self.capture_overrun = true;
                    log::warn!("Capture overrun, dropping oldest block");
                }
                let (oldest, _size) = self.capture.take(Wait::None)?;
                self.capture.release(oldest)?;
                self.capture.acquire(Wait::None)?
            }
            Err(e) => return Err(e),
        };

        // Drift compensation runs on the boundary timestamp just latched.
        self.trackers.local_last_ts_us.store(ts_us, Ordering::Relaxed);
        self.drift
            .tick(ts_us, self.trackers.remote(), self.trim.as_mut());
        self.trackers
            .drift_locked
            .store(self.drift.is_locked(), Ordering::Release);

        Ok(ExchangedBlocks {
            playback: &self.playback,
            capture: slot,
        })
    }

    pub fn drift_state(&self) -> crate::sync::drift::DriftState {
        self.drift.state()
    }
}

/// Producer half and public face of the datapath.
pub struct Datapath {
    config: DatapathConfig,
    codec: Box<dyn Codec>,
    clock: Box<dyn MonotonicClock>,
    exchange: Box<dyn BlockExchange>,
    ring: Arc<SampleRing>,
    trackers: Arc<Trackers>,
    pres: PresentationCompensator,
    /// Decoded PCM for the most recent frame. Deliberately retained across
    /// frames: a reported-missing frame skips decode and replays this.
    decoded: Vec<i16>,
    /// Compensator state parked between streaming sessions.
    parked: Option<(DriftCompensator, Box<dyn AudioClock>)>,
    initialized: bool,
    streaming: bool,
}

impl Datapath {
    pub fn new(
        config: DatapathConfig,
        codec: Box<dyn Codec>,
        clock: Box<dyn MonotonicClock>,
        trim: Box<dyn AudioClock>,
        exchange: Box<dyn BlockExchange>,
    ) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(SampleRing::new(
            config.fifo_blocks(),
            config.block_samples_stereo(),
        )?);
        let pres = PresentationCompensator::new(
            config.presentation.clone(),
            config.block_us,
            config.remote_data_points(),
            config.wait_frames(),
        );
        let drift =
            DriftCompensator::new(config.drift.clone(), config.trim.clone(), config.block_us);
        let decoded = vec![0i16; config.frame_samples_stereo()];

        Ok(Self {
            config,
            codec,
            clock,
            exchange,
            ring,
            trackers: Arc::new(Trackers::new()),
            pres,
            decoded,
            parked: Some((drift, trim)),
            initialized: false,
            streaming: false,
        })
    }

    /// Zero all internal state and mark the datapath ready to start.
    ///
    /// Must be called exactly once before the first [`start`](Self::start);
    /// calling it while streaming is an error.
    pub fn init(&mut self) -> Result<()> {
        if self.streaming {
            return Err(BridgeError::AlreadyRunning);
        }

        self.ring.reset();
        self.trackers.reset_output();
        self.trackers.clear_remote();
        self.trackers.drift_locked.store(false, Ordering::Release);
        self.pres = PresentationCompensator::new(
            self.config.presentation.clone(),
            self.config.block_us,
            self.config.remote_data_points(),
            self.config.wait_frames(),
        );
        let (_, trim) = self
            .parked
            .take()
            .ok_or_else(|| BridgeError::FifoAccounting("driver state lost".to_string()))?;
        self.parked = Some((
            DriftCompensator::new(
                self.config.drift.clone(),
                self.config.trim.clone(),
                self.config.block_us,
            ),
            trim,
        ));
        self.decoded.fill(0);
        self.initialized = true;
        Ok(())
    }

    /// Start streaming, exchanging capture blocks through `capture`.
    ///
    /// The capture FIFO must be empty — a non-empty FIFO means the
    /// previous session was not cleanly torn down, which is a fatal
    /// consistency error, not a recoverable condition.
    pub fn start(&mut self, capture: BlockFifo) -> Result<()> {
        if !self.initialized {
            log::warn!("Datapath not initialized");
            return Err(BridgeError::NotInitialized);
        }
        if self.streaming {
            return Err(BridgeError::AlreadyRunning);
        }

        // Clear counters and mute initial audio.
        self.ring.reset();
        self.trackers.reset_output();

        let (allocated, ready) = capture.used()?;
        if allocated != 0 || ready != 0 {
            return Err(BridgeError::FifoAccounting(format!(
                "capture FIFO not empty at start: allocated={allocated} ready={ready}"
            )));
        }

        // Double-buffer priming: rewind the consumer two slots and hand
        // both (silent) blocks to the exchange, plus two empty capture
        // slots.
        let block_samples = self.config.block_samples_stereo();
        let mut playback = [
            vec![0i16; block_samples],
            vec![0i16; block_samples],
        ];
        self.ring.rewind_cons();
        self.ring.read_block_into(self.ring.cons_idx(), &mut playback[0]);
        self.ring.rewind_cons();
        self.ring.read_block_into(self.ring.cons_idx(), &mut playback[1]);

        let capture_slots = [capture.acquire(Wait::None)?, capture.acquire(Wait::None)?];

        let (drift, trim) = self
            .parked
            .take()
            .ok_or_else(|| BridgeError::FifoAccounting("driver state lost".to_string()))?;
        let driver = BlockDriver::new(
            Arc::clone(&self.ring),
            Arc::clone(&self.trackers),
            drift,
            trim,
            capture,
        );

        self.exchange.start(
            driver,
            PrimedBlocks {
                playback,
                capture: capture_slots,
            },
        )?;
        self.streaming = true;
        Ok(())
    }

    /// Stop streaming. Safe to call from the same context as
    /// [`stream_out`](Self::stream_out), never from the block-complete
    /// context.
    pub fn stop(&mut self) -> Result<()> {
        if !self.streaming {
            return Err(BridgeError::AlreadyStopped);
        }
        self.streaming = false;

        let driver = self.exchange.stop()?;
        self.parked = Some(driver.into_parts());

        // Force presentation compensation to re-measure on the next start.
        self.trackers.clear_remote();
        self.pres.reset();
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stats(&self) -> DatapathStats {
        DatapathStats {
            total_frames: self.trackers.total_frames.load(Ordering::Relaxed),
            total_prod_blocks: self.trackers.total_prod_blocks.load(Ordering::Relaxed),
            total_cons_blocks: self.trackers.total_cons_blocks.load(Ordering::Relaxed),
            total_underruns: self.trackers.total_underruns.load(Ordering::Relaxed),
        }
    }

    pub fn pres_state(&self) -> crate::sync::pres::PresState {
        self.pres.state()
    }

    /// Ingest one wireless frame.
    ///
    /// `frame` is `None` when the transport reported the frame missing; the
    /// remote timestamp tracker is then extrapolated by one frame period
    /// and the previous frame's decoded PCM is replayed. All failure modes
    /// of this path are transient signal-quality events: they are absorbed
    /// and logged, never returned.
    pub fn stream_out(&mut self, frame: Option<&[u8]>, remote_ts_us: u32, bad_frame: bool) {
        if !self.streaming {
            log::warn!("Stream not started, dropping frame");
            return;
        }

        let now = self.clock.now_us();
        let frame_us = self.config.frame_us;
        let block_us = self.config.block_us;
        let blocks_per_frame = self.config.blocks_per_frame();

        if self.trackers.remote() == Some(remote_ts_us) {
            log::warn!("Duplicate timestamp, dropping frame: remote_ts={remote_ts_us}");
            return;
        }

        let mut remote_ts_us = remote_ts_us;
        let mut missing_blocks = 0usize;

        if frame.is_some() {
            if let Some(last) = self.trackers.remote() {
                let mut delta_us = elapsed_us(remote_ts_us, last);

                // Guard against corrupt timestamps: a delta near one frame
                // period but outside tolerance is replaced by the nominal
                // period.
                if delta_us < frame_us + frame_us / 2 {
                    let max_err = self.config.timestamp_delta_max_err_us();
                    if delta_us > frame_us + max_err || delta_us < frame_us - max_err {
                        log::warn!("Invalid timestamp delta: {delta_us}");
                        delta_us = frame_us;
                        remote_ts_us = last.wrapping_add(delta_us);
                    }
                }

                if delta_us > block_us / 2 {
                    // Low-average frame count of the gap. Quantizing at
                    // frame granularity keeps a nominal delta contiguous
                    // even when the frame period is not a whole number of
                    // blocks (7.5 ms frames).
                    let gap_frames = (delta_us.saturating_sub(frame_us / 2) / frame_us) as usize;
                    missing_blocks = gap_frames * blocks_per_frame;
                } else {
                    // Implausibly small forward delta; drop outright.
                    return;
                }
            }
        }

        if missing_blocks > 0 {
            log::warn!("Missed audio frame");
            self.pres.force_wait();
        }

        if frame.is_some() {
            self.trackers.set_remote(remote_ts_us);
        } else {
            log::warn!("Missed audio packet");
            // Estimate the tracker forward; nothing to extrapolate from
            // before the first real frame.
            if let Some(last) = self.trackers.remote() {
                self.trackers.set_remote(last.wrapping_add(frame_us));
            }
        }

        // When to play the received audio.
        let exp_dly_us =
            self.config.presentation_delay_us as i32 - elapsed_us(now, remote_ts_us) as i32;
        let measured = self.trackers.meas_pres_dly_us.load(Ordering::Relaxed);
        let drift_locked = self.trackers.drift_locked.load(Ordering::Acquire);
        let mut adj_us = self.pres.tick(exp_dly_us, measured, drift_locked);

        // Half-block rounding bias away from zero, applied before the
        // clamp below (preserved ordering; see DESIGN.md).
        if adj_us >= 0 {
            adj_us += (block_us / 2) as i32;
        } else {
            adj_us -= (block_us / 2) as i32;
        }

        // Zero as long as |adj_us| < one block period.
        let mut adj_blocks = adj_us / block_us as i32;

        let half_fifo = (self.config.fifo_blocks() / 2) as i32;
        if adj_blocks > half_fifo {
            adj_blocks = half_fifo;
            log::warn!(
                "Requested presentation adjustment out of range: adj_us={adj_us}, total_frames={}",
                self.trackers.total_frames.load(Ordering::Relaxed)
            );
        } else if adj_blocks < -half_fifo {
            adj_blocks = -half_fifo;
            log::warn!(
                "Requested presentation adjustment out of range: adj_us={adj_us}, total_frames={}",
                self.trackers.total_frames.load(Ordering::Relaxed)
            );
        }

        // Account for blocks lost to the gap.
        adj_blocks += missing_blocks as i32;

        if adj_blocks > 0 {
            log::debug!(
                "Inserting {adj_blocks} silent blocks, total_frames={}",
                self.trackers.total_frames.load(Ordering::Relaxed)
            );
            let mut idx = self.ring.prod_idx();
            for i in 0..adj_blocks {
                // Back-dated start time keeps later delay measurements
                // consistent with real blocks.
                let ts = now.wrapping_sub(((adj_blocks - i) as u32) * block_us);
                self.ring.write_silence_at(idx, ts);
                idx = self.ring.next_idx(idx);
                self.ring.publish_prod(idx);
                self.trackers
                    .total_prod_blocks
                    .fetch_add(1, Ordering::Relaxed);
            }
        } else if adj_blocks < 0 {
            log::debug!(
                "Removing {} blocks, total_frames={}",
                -adj_blocks,
                self.trackers.total_frames.load(Ordering::Relaxed)
            );
            self.ring.retreat_prod((-adj_blocks) as usize);
        }

        // Decode; a missing frame replays the previous scratch contents.
        if let Some(buf) = frame {
            if let Err(e) = self.codec.decode(buf, bad_frame, &mut self.decoded) {
                if !bad_frame {
                    log::warn!("Codec decode error: {e}");
                }
            }
        }

        self.trackers.total_frames.fetch_add(1, Ordering::Relaxed);

        // Output. The overrun discard happens after the timestamp state
        // above was already recorded: drift tracking continuity is
        // deliberately kept ahead of audio continuity. The ring cannot
        // represent a completely full state, so one frame of headroom
        // stays reserved.
        if self.ring.distance() + blocks_per_frame >= self.ring.num_blocks() {
            log::warn!(
                "Output stream overrun: total_prod_blocks={}",
                self.trackers.total_prod_blocks.load(Ordering::Relaxed)
            );
            return;
        }

        let block_samples = self.config.block_samples_stereo();
        let mut idx = self.ring.prod_idx();
        for i in 0..blocks_per_frame {
            let chunk = &self.decoded[i * block_samples..(i + 1) * block_samples];
            self.ring
                .write_block_at(idx, chunk, now.wrapping_add(i as u32 * block_us));
            idx = self.ring.next_idx(idx);
        }
        self.ring.publish_prod(idx);
        self.trackers
            .total_prod_blocks
            .fetch_add(blocks_per_frame as u32, Ordering::Relaxed);
    }
}
