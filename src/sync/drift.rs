//! Clock drift compensation.
//!
//! Aligns the local tunable sample clock to the sender's notion of time
//! using nothing but the remote frame timestamps and the local timestamp
//! latched at each block boundary. Ticked once per block-complete.
//!
//! The loop passes through four states: an initialization window letting
//! the transport settle, a calibration window establishing the center trim
//! frequency from the gross rate error, an offset phase nulling the
//! residual phase of the remote clock against the local block boundary,
//! and a locked phase applying half-corrections. Lock and unlock use
//! different thresholds so the loop cannot chatter at the boundary, and
//! the halved correction in lock keeps the approach asymptotic instead of
//! oscillating.

use crate::config::{ClockTrimConfig, DriftConfig};
use crate::hal::AudioClock;
use crate::timing::{elapsed_us, fold_into_half};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftState {
    /// Waiting out the transport/decoder pipeline start-up.
    Init,
    /// Measuring the gross rate error to place the center frequency.
    Calib,
    /// Nulling the residual phase offset against the block boundary.
    Offset,
    /// Converged; half-corrections only.
    Locked,
}

impl DriftState {
    fn name(self) -> &'static str {
        match self {
            DriftState::Init => "INIT",
            DriftState::Calib => "CALIB",
            DriftState::Offset => "OFFSET",
            DriftState::Locked => "LOCKED",
        }
    }
}

pub struct DriftCompensator {
    config: DriftConfig,
    trim: ClockTrimConfig,
    block_us: u32,
    /// Block ticks per measurement window.
    window_ticks: u32,

    state: DriftState,
    ctr: u32,
    meas_start_ts_us: u32,
    center_freq: u16,
}

impl DriftCompensator {
    pub fn new(config: DriftConfig, trim: ClockTrimConfig, block_us: u32) -> Self {
        let window_ticks = config.meas_period_us / block_us;
        let center_freq = trim.center;
        Self {
            config,
            trim,
            block_us,
            window_ticks,
            state: DriftState::Init,
            ctr: 0,
            meas_start_ts_us: 0,
            center_freq,
        }
    }

    pub fn state(&self) -> DriftState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.state == DriftState::Locked
    }

    /// Center trim frequency established during calibration.
    pub fn center_freq(&self) -> u16 {
        self.center_freq
    }

    fn set_state(&mut self, new_state: DriftState) {
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        log::info!("Drift comp state: {}", new_state.name());
    }

    fn apply_trim(&self, freq: i32, clock: &mut dyn AudioClock) {
        if self.config.enabled {
            clock.set_trim(self.trim.clamp(freq));
        }
    }

    /// One measurement tick, called once per block-complete with the local
    /// boundary timestamp and the last remote frame timestamp seen.
    ///
    /// The only external side effect is the trim applied through `clock`;
    /// state transitions are logged but not returned.
    pub fn tick(
        &mut self,
        local_ts_us: u32,
        remote_ts_us: Option<u32>,
        clock: &mut dyn AudioClock,
    ) {
        self.ctr += 1;
        if self.ctr < self.window_ticks {
            // Mid-window; collect more data.
            return;
        }

        match self.state {
            DriftState::Init => {
                // Hold INIT until a remote timestamp has been observed.
                if let Some(remote) = remote_ts_us {
                    self.ctr = 0;
                    self.meas_start_ts_us = remote;
                    self.set_state(DriftState::Calib);
                }
            }
            DriftState::Calib => {
                self.ctr = 0;
                let Some(remote) = remote_ts_us else { return };

                let err_us = self.config.meas_period_us as i32
                    - elapsed_us(remote, self.meas_start_ts_us) as i32;
                let adj = self.trim.trim_for_error(err_us);

                self.center_freq = self.trim.clamp(self.trim.center as i32 + adj);
                self.apply_trim(self.center_freq as i32, clock);
                self.set_state(DriftState::Offset);
            }
            DriftState::Offset => {
                self.ctr = 0;
                let Some(remote) = remote_ts_us else { return };

                let err_us = fold_into_half(elapsed_us(remote, local_ts_us), self.block_us);
                let adj = self.trim.trim_for_error(err_us);
                self.apply_trim(self.center_freq as i32 + adj, clock);

                if err_us.abs() < self.config.lock_threshold_us {
                    self.set_state(DriftState::Locked);
                }
            }
            DriftState::Locked => {
                self.ctr = 0;
                let Some(remote) = remote_ts_us else { return };

                // Asymptotic correction with small errors.
                let err_us = fold_into_half(elapsed_us(remote, local_ts_us), self.block_us) / 2;
                let adj = self.trim.trim_for_error(err_us);
                self.apply_trim(self.center_freq as i32 + adj, clock);

                if err_us.abs() > self.config.unlock_threshold_us {
                    self.set_state(DriftState::Offset);
                }
            }
        }
    }
}
