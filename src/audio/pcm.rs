//! Mono/stereo channel conversion on raw PCM byte buffers.
//!
//! Pure, stateless transforms used where the datapath's block layout does
//! not match the codec's. Samples are treated as opaque byte groups, so the
//! same code handles 16-, 24-, and 32-bit PCM; any other depth is rejected.
//! Output length is always exactly 2x (mono to stereo) or 0.5x (stereo to
//! mono) the input length.

use crate::error::{BridgeError, Result};

/// Position of a channel within an interleaved stereo stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// First sample of each interleaved pair.
    Left,
    /// Second sample of each interleaved pair.
    Right,
}

fn bytes_per_sample(bit_depth: u8) -> Result<usize> {
    match bit_depth {
        16 | 24 | 32 => Ok(bit_depth as usize / 8),
        _ => {
            log::error!("Invalid bit depth: {bit_depth}");
            Err(BridgeError::InvalidBitDepth(bit_depth))
        }
    }
}

fn check_stride(size: usize, bytes_per_sample: usize, channels: usize) -> Result<()> {
    let stride = bytes_per_sample * channels;
    if size % stride != 0 {
        log::error!("Size {size} is not divisible by sample stride {stride}");
        return Err(BridgeError::SizeMismatch { size, stride });
    }
    Ok(())
}

/// Spread a mono stream into `channel` of a stereo stream, silence in the
/// other channel.
pub fn zero_pad(input: &[u8], channel: Channel, bit_depth: u8) -> Result<Vec<u8>> {
    let bps = bytes_per_sample(bit_depth)?;
    check_stride(input.len(), bps, 1)?;

    let mut output = Vec::with_capacity(input.len() * 2);
    let silence = vec![0u8; bps];
    for sample in input.chunks_exact(bps) {
        match channel {
            Channel::Left => {
                output.extend_from_slice(sample);
                output.extend_from_slice(&silence);
            }
            Channel::Right => {
                output.extend_from_slice(&silence);
                output.extend_from_slice(sample);
            }
        }
    }
    Ok(output)
}

/// Duplicate a mono stream into both channels of a stereo stream.
pub fn copy_pad(input: &[u8], bit_depth: u8) -> Result<Vec<u8>> {
    let bps = bytes_per_sample(bit_depth)?;
    check_stride(input.len(), bps, 1)?;

    let mut output = Vec::with_capacity(input.len() * 2);
    for sample in input.chunks_exact(bps) {
        output.extend_from_slice(sample);
        output.extend_from_slice(sample);
    }
    Ok(output)
}

/// Interleave two mono streams into one stereo stream.
///
/// The inputs must be the same length.
pub fn combine(left: &[u8], right: &[u8], bit_depth: u8) -> Result<Vec<u8>> {
    let bps = bytes_per_sample(bit_depth)?;
    if left.len() != right.len() {
        return Err(BridgeError::InvalidArgument(format!(
            "channel lengths differ: {} vs {}",
            left.len(),
            right.len()
        )));
    }
    check_stride(left.len(), bps, 1)?;

    let mut output = Vec::with_capacity(left.len() * 2);
    for (l, r) in left.chunks_exact(bps).zip(right.chunks_exact(bps)) {
        output.extend_from_slice(l);
        output.extend_from_slice(r);
    }
    Ok(output)
}

/// Extract one channel of an interleaved stereo stream.
pub fn split_one(input: &[u8], channel: Channel, bit_depth: u8) -> Result<Vec<u8>> {
    let bps = bytes_per_sample(bit_depth)?;
    check_stride(input.len(), bps, 2)?;

    let mut output = Vec::with_capacity(input.len() / 2);
    for pair in input.chunks_exact(bps * 2) {
        let sample = match channel {
            Channel::Left => &pair[..bps],
            Channel::Right => &pair[bps..],
        };
        output.extend_from_slice(sample);
    }
    Ok(output)
}

/// De-interleave a stereo stream into `(left, right)` mono streams.
pub fn split_two(input: &[u8], bit_depth: u8) -> Result<(Vec<u8>, Vec<u8>)> {
    let bps = bytes_per_sample(bit_depth)?;
    check_stride(input.len(), bps, 2)?;

    let mut left = Vec::with_capacity(input.len() / 2);
    let mut right = Vec::with_capacity(input.len() / 2);
    for pair in input.chunks_exact(bps * 2) {
        left.extend_from_slice(&pair[..bps]);
        right.extend_from_slice(&pair[bps..]);
    }
    Ok((left, right))
}
