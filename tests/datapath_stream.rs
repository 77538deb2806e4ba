//! End-to-end streaming tests: frames in through the producer path, blocks
//! out through a simulated exchange, on a hand-driven microsecond timeline.

use wavebridge::audio::fifo::{BlockFifo, Wait};
use wavebridge::config::{DatapathConfig, DriftConfig};
use wavebridge::datapath::Datapath;
use wavebridge::hal::Codec;
use wavebridge::sim::{LoopExchange, PcmCodec, SharedTrim, SimClock};
use wavebridge::sync::drift::DriftState;
use wavebridge::sync::pres::PresState;

struct Harness {
    datapath: Datapath,
    exchange: LoopExchange,
    capture: BlockFifo,
    clock: SimClock,
    trim: SharedTrim,
    config: DatapathConfig,
}

fn start_harness(config: DatapathConfig) -> Harness {
    let clock = SimClock::new(0);
    let trim = SharedTrim::new(config.trim.center);
    let exchange = LoopExchange::new();
    let mut datapath = Datapath::new(
        config.clone(),
        Box::new(PcmCodec),
        Box::new(clock.clone()),
        Box::new(trim.clone()),
        Box::new(exchange.clone()),
    )
    .unwrap();
    datapath.init().unwrap();

    let capture = BlockFifo::new(4, config.block_samples_stereo() * 2).unwrap();
    datapath.start(capture.clone()).unwrap();

    Harness {
        datapath,
        exchange,
        capture,
        clock,
        trim,
        config,
    }
}

impl Harness {
    /// Send one frame whose samples all carry `mark`.
    fn send_frame(&mut self, ts_us: u32, mark: i16) {
        let pcm = vec![mark; self.config.frame_samples_stereo()];
        let mut bytes = vec![0u8; pcm.len() * 2];
        PcmCodec.encode(&pcm, &mut bytes).unwrap();
        self.clock.set(ts_us);
        self.datapath.stream_out(Some(&bytes), ts_us, false);
        self.drain_capture();
    }

    /// Complete one block period and return the playback samples.
    fn tick(&mut self, ts_us: u32) -> Vec<i16> {
        self.clock.set(ts_us);
        self.exchange.tick(ts_us).unwrap()
    }

    fn drain_capture(&self) {
        while let Ok((slot, _size)) = self.capture.take(Wait::None) {
            self.capture.release(slot).unwrap();
        }
    }
}

/// Frames arriving on a clean 10 ms cadence play back contiguously: every
/// block of every frame appears exactly once, in order, with no underruns.
#[test]
fn test_contiguous_stream_plays_every_block_once() {
    let mut h = start_harness(DatapathConfig::default());
    let frame_us = h.config.frame_us;
    let block_us = h.config.block_us;
    let blocks_per_frame = h.config.blocks_per_frame();

    let mut marks = Vec::new();
    let mut frame_no = 0u32;
    for j in 0..55u32 {
        let tick_ts = 500 + j * block_us;
        // Frames arrive just before the block boundary that follows them.
        if frame_no < 5 && tick_ts > (frame_no + 1) * frame_us {
            frame_no += 1;
            h.send_frame(frame_no * frame_us, frame_no as i16);
        }
        let playback = h.tick(tick_ts);
        // Frame content is constant per frame, so one sample identifies it.
        marks.push(playback[0]);
    }

    let nonzero: Vec<i16> = marks.into_iter().filter(|&m| m != 0).collect();
    let mut expected = Vec::new();
    for mark in 1..=4i16 {
        expected.extend(std::iter::repeat(mark).take(blocks_per_frame));
    }
    // 45 data ticks fit four whole frames and half of the fifth.
    expected.extend(std::iter::repeat(5i16).take(5));
    assert_eq!(nonzero, expected);

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 5);
    assert_eq!(stats.total_prod_blocks, 5 * blocks_per_frame as u32);
    assert_eq!(stats.total_underruns, 0);
}

/// A whole frame lost from the timeline is made up with silent blocks, so
/// later frames keep their presentation alignment.
#[test]
fn test_missing_frame_is_replaced_with_silence() {
    let mut h = start_harness(DatapathConfig::default());
    let block_us = h.config.block_us;
    let blocks_per_frame = h.config.blocks_per_frame() as u32;

    h.send_frame(10_000, 1);
    // Frame at 20 000 never arrives; the next one shows up a full frame
    // late.
    let mut marks = Vec::new();
    for j in 0..50u32 {
        let tick_ts = 500 + j * block_us;
        if tick_ts == 30_500 {
            h.send_frame(30_000, 3);
        }
        let playback = h.tick(tick_ts);
        marks.push(playback[0]);
    }

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 2);
    // One frame of silence was inserted between the two data frames.
    assert_eq!(stats.total_prod_blocks, 3 * blocks_per_frame);

    // The gap's ticks repeated the last block of frame 1 (underrun), then
    // the inserted silence played, then frame 3.
    assert!(stats.total_underruns > 0);
    let tail: Vec<i16> = marks[marks.len() - 10..].to_vec();
    assert!(tail.iter().all(|&m| m == 3));
    let silent: Vec<i16> = marks[marks.len() - 20..marks.len() - 10].to_vec();
    assert!(silent.iter().all(|&m| m == 0));
}

/// 7.5 ms frames truncate to seven whole blocks and stream contiguously:
/// a nominal 7500 µs timestamp delta must not register as a gap.
#[test]
fn test_short_frames_stream_without_gap_insertion() {
    let config = DatapathConfig {
        frame_us: 7_500,
        drift: DriftConfig {
            meas_period_us: 150_000,
            ..DriftConfig::default()
        },
        ..DatapathConfig::default()
    };
    let mut h = start_harness(config);
    let block_us = h.config.block_us;
    let frame_us = h.config.frame_us;
    assert_eq!(h.config.blocks_per_frame(), 7);

    let mut frame_no = 0u32;
    for j in 0..40u32 {
        let tick_ts = 500 + j * block_us;
        if frame_no < 4 && tick_ts > (frame_no + 1) * frame_us {
            frame_no += 1;
            h.send_frame(frame_no * frame_us, frame_no as i16);
        }
        h.tick(tick_ts);
    }

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 4);
    // Seven blocks per frame, and no silence inserted between them.
    assert_eq!(stats.total_prod_blocks, 4 * 7);
}

/// A duplicated frame timestamp is dropped without disturbing playback.
#[test]
fn test_duplicate_timestamp_is_dropped() {
    let mut h = start_harness(DatapathConfig::default());
    h.send_frame(10_000, 1);
    h.send_frame(10_000, 2);

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 1);
    assert_eq!(
        stats.total_prod_blocks,
        h.config.blocks_per_frame() as u32
    );
}

/// Timestamps wrapping the 32-bit clock do not disturb the stream.
#[test]
fn test_stream_survives_timestamp_wrap() {
    let mut h = start_harness(DatapathConfig::default());
    let block_us = h.config.block_us;
    let frame_us = h.config.frame_us;
    let base = u32::MAX - 25_000;

    let mut frame_no = 0u32;
    for j in 0..55u32 {
        let tick_ts = base.wrapping_add(500 + j * block_us);
        let next_frame_ts = base.wrapping_add((frame_no + 1) * frame_us);
        if frame_no < 5 && 500 + j * block_us > (frame_no + 1) * frame_us {
            frame_no += 1;
            h.send_frame(next_frame_ts, frame_no as i16);
        }
        h.tick(tick_ts);
    }

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 5);
    // No spurious gap or overrun handling across the wrap.
    assert_eq!(
        stats.total_prod_blocks,
        5 * h.config.blocks_per_frame() as u32
    );
    assert_eq!(stats.total_underruns, 0);
}

/// Closed-loop run against a modeled oscillator: the drift loop calibrates
/// the trim word to cancel a 120 ppm error and locks, after which the
/// presentation loop starts adjusting.
#[test]
fn test_drift_and_presentation_lock_against_modeled_oscillator() {
    let mut h = start_harness(DatapathConfig::default());
    let config = h.config.clone();
    let drift_ppm = 120.0f64;
    let trim_gain_ppm =
        config.trim.ns_per_unit as f64 / 1_000.0 / config.drift.meas_period_us as f64 * 1e6;

    let block_ns = config.block_us as f64 * 1_000.0;
    let frame_ns = config.frame_us as f64 * 1_000.0;
    let mut next_frame_ns = frame_ns;
    let mut next_block_ns = 100.0 * 1_000.0;
    let mut frames_sent = 0u32;

    while frames_sent < 400 {
        if next_frame_ns <= next_block_ns {
            frames_sent += 1;
            h.send_frame((next_frame_ns / 1_000.0) as u32, 1);
            next_frame_ns += frame_ns;
        } else {
            h.tick((next_block_ns / 1_000.0) as u32);
            let eff_ppm = drift_ppm
                + (h.trim.get() as f64 - config.trim.center as f64) * trim_gain_ppm;
            next_block_ns += block_ns / (1.0 + eff_ppm * 1e-6);
        }
    }

    assert_eq!(h.exchange.drift_state(), Some(DriftState::Locked));

    // Cancelling +120 ppm takes roughly 120 / 3.31 trim units below center.
    let offset = h.trim.get() as i32 - config.trim.center as i32;
    assert!(
        (-60..=-20).contains(&offset),
        "trim offset {offset} outside expected range"
    );

    // With the sample clock locked the presentation loop has engaged.
    assert_ne!(h.datapath.pres_state(), PresState::Init);

    let stats = h.datapath.stats();
    assert_eq!(stats.total_frames, 400);
    assert!(stats.total_underruns < 50);
}
