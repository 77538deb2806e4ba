//! Collaborator interfaces consumed by the datapath.
//!
//! The wireless transport, the codec, the tunable audio clock, and the
//! hardware block exchange all live behind these traits. The datapath core
//! never touches hardware directly; tests and the link simulator supply
//! their own implementations.

use crate::audio::fifo::FifoSlot;
use crate::datapath::BlockDriver;
use crate::error::Result;

/// Opaque audio encode/decode pair.
///
/// Decode failures on frames not already flagged bad are logged by the
/// caller, not treated as fatal; the codec is expected to conceal.
pub trait Codec: Send {
    /// Decode one encoded frame into interleaved stereo PCM.
    ///
    /// `bad_frame` tells the codec the transport flagged this frame as
    /// corrupt, so it should produce concealment output. Returns the number
    /// of samples written to `pcm_out`.
    fn decode(&mut self, frame: &[u8], bad_frame: bool, pcm_out: &mut [i16]) -> Result<usize>;

    /// Encode interleaved stereo PCM into one frame. Returns the number of
    /// bytes written to `frame_out`.
    fn encode(&mut self, pcm: &[i16], frame_out: &mut [u8]) -> Result<usize>;
}

/// Tunable audio sample clock.
///
/// The datapath clamps trim values to the configured hardware range before
/// calling; implementations may clamp again but do not need to.
pub trait AudioClock: Send {
    fn set_trim(&mut self, freq: u16);
}

/// Buffer pair handed to the exchange for one block period.
pub struct ExchangedBlocks<'a> {
    /// Interleaved stereo samples to play out this period.
    pub playback: &'a [i16],
    /// Empty slot for the hardware to fill with captured samples.
    pub capture: FifoSlot,
}

/// The two buffer pairs priming the double-buffered exchange at start.
pub struct PrimedBlocks {
    pub playback: [Vec<i16>; 2],
    pub capture: [FifoSlot; 2],
}

/// Hardware block exchange (I2S or equivalent).
///
/// After `start`, the implementation must invoke
/// [`BlockDriver::block_complete`] once per block period from a
/// bounded-latency context, handing back the captured slot it filled and
/// passing the timestamp its sample clock latched at the block boundary.
///
/// `stop` hands the driver back so the orchestrator's compensation state
/// survives a stop/start cycle.
pub trait BlockExchange: Send {
    fn start(&mut self, driver: BlockDriver, primed: PrimedBlocks) -> Result<()>;
    fn stop(&mut self) -> Result<BlockDriver>;
}
