//! Configuration for the bridge datapath.
//!
//! All timing is expressed in microseconds of the free-running 32-bit wall
//! clock. Defaults carry the values the datapath was originally tuned for:
//! 10 ms frames cut into 1 ms blocks, a 40 ms output sample FIFO, and a
//! 100 ms measurement window for both compensation loops.
//!
//! Every derived quantity (blocks per frame, samples per block, data points
//! per window) is checked once, in [`DatapathConfig::validate`], so the rest
//! of the crate can divide freely.

use serde::Deserialize;

use crate::error::{BridgeError, Result};

/// Top-level datapath configuration.
///
/// # Example
/// ```
/// use wavebridge::config::DatapathConfig;
///
/// let config = DatapathConfig::default();
/// config.validate().unwrap();
/// assert_eq!(config.fifo_blocks(), 40);
/// assert_eq!(config.blocks_per_frame(), 10);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatapathConfig {
    /// Audio sample rate in Hz (typically 48000)
    pub sample_rate_hz: u32,
    /// Duration of one encoded frame in µs (10000, or 7500 for short-frame codecs)
    pub frame_us: u32,
    /// Duration of one audio block in µs (the hardware exchange period)
    pub block_us: u32,
    /// Total output sample FIFO period in µs
    pub fifo_us: u32,
    /// Target end-to-end presentation delay in µs
    pub presentation_delay_us: u32,
    /// Clock drift compensation loop
    pub drift: DriftConfig,
    /// Presentation delay compensation loop
    pub presentation: PresConfig,
    /// Tunable audio clock characteristics
    pub trim: ClockTrimConfig,
}

/// Clock drift compensation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Apply computed trims to the audio clock (state tracking runs regardless)
    pub enabled: bool,
    /// Measurement window in µs; must be a multiple of both block and frame periods
    pub meas_period_us: u32,
    /// Phase error magnitude in µs below which the loop locks
    pub lock_threshold_us: i32,
    /// Phase error magnitude in µs above which a locked loop falls back to offset tracking
    pub unlock_threshold_us: i32,
}

/// Presentation delay compensation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresConfig {
    /// Report the measured delay error as an adjustment (state tracking runs regardless)
    pub enabled: bool,
    /// Mean delay error magnitude in µs below which the loop locks
    pub lock_threshold_us: i32,
}

/// Tunable audio clock characteristics.
///
/// The trim value is a raw frequency word written to the hardware clock
/// unit. One unit of trim shifts the clock by `ns_per_unit` nanoseconds
/// over one drift measurement window, so a measured timing error converts
/// to a trim delta with a fixed linear gain.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockTrimConfig {
    /// Nominal center frequency word
    pub center: u16,
    /// Lowest frequency word the hardware accepts
    pub min: u16,
    /// Highest frequency word the hardware accepts
    pub max: u16,
    /// Nanoseconds of window error corrected per trim unit
    pub ns_per_unit: i32,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48_000,
            frame_us: 10_000,
            block_us: 1_000,
            fifo_us: 40_000,
            presentation_delay_us: 10_000,
            drift: DriftConfig::default(),
            presentation: PresConfig::default(),
            trim: ClockTrimConfig::default(),
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meas_period_us: 100_000,
            lock_threshold_us: 16,
            unlock_threshold_us: 32,
        }
    }
}

impl Default for PresConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_threshold_us: 1_000,
        }
    }
}

impl Default for ClockTrimConfig {
    fn default() -> Self {
        Self {
            center: 39_854,
            min: 36_834,
            max: 42_874,
            ns_per_unit: 331,
        }
    }
}

impl ClockTrimConfig {
    /// Convert a measured timing error to a trim delta.
    ///
    /// Works in nanoseconds to reduce rounding error. Positive timing error
    /// (local clock fast) yields a negative trim delta.
    pub fn trim_for_error(&self, err_us: i32) -> i32 {
        -(err_us.saturating_mul(1_000)) / self.ns_per_unit
    }

    /// Clamp a frequency word to the hardware-valid range.
    pub fn clamp(&self, freq: i32) -> u16 {
        freq.clamp(self.min as i32, self.max as i32) as u16
    }
}

impl DatapathConfig {
    /// Blocks held by the output sample FIFO.
    pub fn fifo_blocks(&self) -> usize {
        (self.fifo_us / self.block_us) as usize
    }

    /// Whole blocks carried by one frame.
    ///
    /// A frame period that is not an exact multiple of the block period
    /// truncates to whole blocks (7.5 ms frames carry 7 blocks); the
    /// residual samples never enter the sample FIFO.
    pub fn blocks_per_frame(&self) -> usize {
        (self.frame_us / self.block_us) as usize
    }

    /// Mono samples in one block.
    pub fn block_samples_mono(&self) -> usize {
        (self.sample_rate_hz as u64 * self.block_us as u64 / 1_000_000) as usize
    }

    /// Interleaved stereo samples in one block.
    pub fn block_samples_stereo(&self) -> usize {
        self.block_samples_mono() * 2
    }

    /// Interleaved stereo samples in one frame.
    pub fn frame_samples_stereo(&self) -> usize {
        self.block_samples_stereo() * self.blocks_per_frame()
    }

    /// Block-complete ticks per drift measurement window.
    pub fn local_data_points(&self) -> u32 {
        self.drift.meas_period_us / self.block_us
    }

    /// Arriving frames per presentation measurement window.
    pub fn remote_data_points(&self) -> u32 {
        self.drift.meas_period_us / self.frame_us
    }

    /// Frames covering one full sample FIFO period (presentation wait window).
    pub fn wait_frames(&self) -> u32 {
        self.fifo_us / self.frame_us
    }

    /// Tolerated deviation of a frame timestamp delta from nominal, in µs.
    pub fn timestamp_delta_max_err_us(&self) -> u32 {
        self.frame_us / 1_000
    }

    /// Check all cross-field constraints. Call once at construction.
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, msg: &str) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(BridgeError::Config(msg.to_string()))
            }
        }

        check(self.block_us > 0, "block period must be positive")?;
        check(
            self.frame_us >= self.block_us,
            "frame period must cover at least one block period",
        )?;
        check(
            self.fifo_us % self.block_us == 0,
            "sample FIFO period must be a multiple of the block period",
        )?;
        check(
            self.fifo_blocks() >= 2 * self.blocks_per_frame(),
            "sample FIFO must hold at least two frames",
        )?;
        check(
            (self.sample_rate_hz as u64 * self.block_us as u64) % 1_000_000 == 0,
            "block period must contain a whole number of samples",
        )?;
        check(
            self.block_samples_mono() > 0,
            "block period too short for the sample rate",
        )?;
        check(
            self.drift.meas_period_us % self.block_us == 0
                && self.drift.meas_period_us % self.frame_us == 0,
            "drift measurement period must be a multiple of block and frame periods",
        )?;
        check(
            self.drift.lock_threshold_us > 0
                && self.drift.unlock_threshold_us > self.drift.lock_threshold_us,
            "drift unlock threshold must exceed the lock threshold",
        )?;
        check(
            self.presentation.lock_threshold_us > 0,
            "presentation lock threshold must be positive",
        )?;
        check(
            self.trim.min <= self.trim.center && self.trim.center <= self.trim.max,
            "trim center must lie within [min, max]",
        )?;
        check(self.trim.ns_per_unit > 0, "trim sensitivity must be positive")?;
        Ok(())
    }

    /// Parse a configuration from TOML, then validate it.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DatapathConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fifo_blocks(), 40);
        assert_eq!(config.blocks_per_frame(), 10);
        assert_eq!(config.block_samples_mono(), 48);
        assert_eq!(config.local_data_points(), 100);
        assert_eq!(config.remote_data_points(), 10);
        assert_eq!(config.wait_frames(), 4);
        assert_eq!(config.timestamp_delta_max_err_us(), 10);
    }

    #[test]
    fn test_short_frame_config() {
        let config = DatapathConfig {
            frame_us: 7_500,
            drift: DriftConfig {
                meas_period_us: 150_000,
                ..DriftConfig::default()
            },
            ..DatapathConfig::default()
        };
        config.validate().unwrap();
        // 7.5 ms frames truncate to whole blocks.
        assert_eq!(config.blocks_per_frame(), 7);
        assert_eq!(
            config.frame_samples_stereo(),
            7 * config.block_samples_stereo()
        );
        assert_eq!(config.remote_data_points(), 20);
        assert_eq!(config.wait_frames(), 5);
        assert_eq!(config.timestamp_delta_max_err_us(), 7);
    }

    #[test]
    fn test_frame_shorter_than_block_rejected() {
        let config = DatapathConfig {
            frame_us: 500,
            ..DatapathConfig::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_frame_not_dividing_drift_window_rejected() {
        let config = DatapathConfig {
            frame_us: 10_500,
            ..DatapathConfig::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_fifo_smaller_than_two_frames_rejected() {
        let config = DatapathConfig {
            fifo_us: 15_000,
            ..DatapathConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trim_conversion_matches_hardware_gain() {
        let trim = ClockTrimConfig::default();
        assert_eq!(trim.trim_for_error(0), 0);
        assert_eq!(trim.trim_for_error(331), -1_000);
        assert_eq!(trim.trim_for_error(-331), 1_000);
        // One µs of error is three trim units.
        assert_eq!(trim.trim_for_error(1), -3);
    }

    #[test]
    fn test_trim_clamp() {
        let trim = ClockTrimConfig::default();
        assert_eq!(trim.clamp(100_000), trim.max);
        assert_eq!(trim.clamp(-5), trim.min);
        assert_eq!(trim.clamp(39_000), 39_000);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = DatapathConfig::from_toml(
            r#"
            frame_us = 7500

            [drift]
            meas_period_us = 150000
            "#,
        )
        .unwrap();
        assert_eq!(config.frame_us, 7_500);
        assert_eq!(config.drift.meas_period_us, 150_000);
        // Unspecified fields keep their defaults.
        assert_eq!(config.sample_rate_hz, 48_000);
    }

    #[test]
    fn test_toml_invalid_config_rejected() {
        assert!(DatapathConfig::from_toml("frame_us = 999").is_err());
    }
}
