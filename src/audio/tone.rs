//! Test tone generation.
//!
//! Produces one period of a sine wave and replays it into arbitrarily long
//! buffers, which is enough to exercise the whole output path without a
//! live wireless link.

use std::f32::consts::PI;

use crate::error::{BridgeError, Result};

const FREQ_LIMIT_LOW_HZ: u32 = 100;
const FREQ_LIMIT_HIGH_HZ: u32 = 10_000;

/// Generate one period of a sine tone as 16-bit mono samples.
///
/// `tone_hz` must be within 100..=10000 Hz and `amplitude` within (0, 1].
pub fn generate(tone_hz: u32, sample_rate_hz: u32, amplitude: f32) -> Result<Vec<i16>> {
    if sample_rate_hz == 0 || !(FREQ_LIMIT_LOW_HZ..=FREQ_LIMIT_HIGH_HZ).contains(&tone_hz) {
        return Err(BridgeError::InvalidArgument(format!(
            "tone frequency {tone_hz} Hz outside {FREQ_LIMIT_LOW_HZ}..={FREQ_LIMIT_HIGH_HZ}"
        )));
    }
    if !(amplitude > 0.0 && amplitude <= 1.0) {
        return Err(BridgeError::InvalidArgument(format!(
            "amplitude {amplitude} outside (0, 1]"
        )));
    }

    let period_samples = (sample_rate_hz / tone_hz) as usize;
    let mut tone = Vec::with_capacity(period_samples);
    for i in 0..period_samples {
        let phase = i as f32 * 2.0 * PI / period_samples as f32;
        tone.push((amplitude * phase.sin() * i16::MAX as f32) as i16);
    }
    Ok(tone)
}

/// Fill `dst` by replaying `src` end to end, continuing from `*pos`.
///
/// `*pos` carries the replay position across calls so consecutive fills
/// form one continuous waveform. Either buffer being empty is an
/// input-validation error; `dst` is left untouched in that case.
pub fn fill_continuous<T: Copy>(dst: &mut [T], src: &[T], pos: &mut usize) -> Result<()> {
    if dst.is_empty() || src.is_empty() {
        return Err(BridgeError::InvalidArgument(
            "buffer size cannot be zero".to_string(),
        ));
    }

    for out in dst.iter_mut() {
        if *pos >= src.len() {
            *pos = 0;
        }
        *out = src[*pos];
        *pos += 1;
    }
    Ok(())
}
