//! Presentation delay compensation.
//!
//! Keeps the end-to-end presentation delay of arriving frames pinned near
//! the configured target by reporting a signed microsecond adjustment once
//! per measurement window; the orchestrator converts it to whole-block
//! insertions or removals. Ticked once per arriving frame.
//!
//! Meaningless while the sample clock itself is still slewing, so any tick
//! taken while drift compensation is not locked forces the machine back to
//! INIT and reports zero. A missing frame forces WAIT, which sits out one
//! full sample-FIFO period before measuring from scratch rather than
//! chasing noise.

use crate::config::PresConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresState {
    /// Reset accumulators before measuring.
    Init,
    /// Accumulating delay error over a measurement window.
    Meas,
    /// Sitting out a disturbance before re-measuring.
    Wait,
    /// Converged on the target delay.
    Locked,
}

impl PresState {
    fn name(self) -> &'static str {
        match self {
            PresState::Init => "INIT",
            PresState::Meas => "MEAS",
            PresState::Wait => "WAIT",
            PresState::Locked => "LOCKED",
        }
    }
}

pub struct PresentationCompensator {
    config: PresConfig,
    block_us: u32,
    /// Frames per measurement window.
    window_frames: u32,
    /// Frames to sit out in WAIT (one full sample-FIFO period).
    wait_frames: u32,

    state: PresState,
    ctr: u32,
    sum_err_us: i64,
    err_us: i32,
}

impl PresentationCompensator {
    pub fn new(config: PresConfig, block_us: u32, window_frames: u32, wait_frames: u32) -> Self {
        Self {
            config,
            block_us,
            window_frames,
            wait_frames,
            state: PresState::Init,
            ctr: 0,
            sum_err_us: 0,
            err_us: 0,
        }
    }

    pub fn state(&self) -> PresState {
        self.state
    }

    /// Mean delay error of the last completed measurement window.
    pub fn last_err_us(&self) -> i32 {
        self.err_us
    }

    fn set_state(&mut self, new_state: PresState) {
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        log::info!("Pres comp state: {}", new_state.name());
    }

    /// Force the machine to sit out a disturbance (missing frame).
    pub fn force_wait(&mut self) {
        self.ctr = 0;
        self.set_state(PresState::Wait);
    }

    /// Reset to INIT (stream stop).
    pub fn reset(&mut self) {
        self.set_state(PresState::Init);
    }

    /// One tick per arriving frame.
    ///
    /// `expected_delay_us` is the delay the frame should still see when it
    /// reaches the output; `measured_delay_us` is the presentation delay
    /// the consumer actually measured. Returns the signed µs adjustment to
    /// apply, zero except on the frame completing a measurement window.
    pub fn tick(&mut self, expected_delay_us: i32, measured_delay_us: u32, drift_locked: bool) -> i32 {
        if !drift_locked {
            // Unconditional reset while the sample clock is not frequency-locked.
            self.set_state(PresState::Init);
            return 0;
        }

        let mut adj_us = 0;

        match self.state {
            PresState::Init => {
                self.ctr = 0;
                self.sum_err_us = 0;
                self.set_state(PresState::Meas);
            }
            PresState::Meas => {
                if self.ctr < self.window_frames {
                    self.ctr += 1;
                    self.sum_err_us += expected_delay_us as i64 - measured_delay_us as i64;
                    return 0;
                }

                self.ctr = 0;
                self.err_us = (self.sum_err_us / self.window_frames as i64) as i32;
                self.sum_err_us = 0;

                if self.config.enabled {
                    adj_us = self.err_us;
                }

                let half_block = (self.block_us / 2) as i32;
                if adj_us >= half_block || adj_us <= -half_block {
                    // At least one whole block of movement pending; sit out
                    // a FIFO period instead of measuring into the jump.
                    self.set_state(PresState::Wait);
                } else if self.err_us.abs() < self.config.lock_threshold_us {
                    // Drift compensation is necessarily locked here.
                    self.set_state(PresState::Locked);
                }
            }
            PresState::Wait => {
                if self.ctr > self.wait_frames {
                    self.set_state(PresState::Init);
                } else {
                    self.ctr += 1;
                }
            }
            PresState::Locked => {
                // Leaves LOCKED via force_wait (missing frame) or the
                // drift-unlock reset above.
            }
        }

        adj_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatapathConfig;

    fn make(config: &DatapathConfig) -> PresentationCompensator {
        PresentationCompensator::new(
            config.presentation.clone(),
            config.block_us,
            config.remote_data_points(),
            config.wait_frames(),
        )
    }

    /// Feed one full measurement window with a constant delay error and
    /// return the adjustment reported at the window boundary.
    fn run_window(comp: &mut PresentationCompensator, err_us: i32, expected: i32) -> i32 {
        // Measured delay below target by `err_us`.
        let measured = (expected - err_us) as u32;
        let mut last = 0;
        // INIT consumes one tick; window completion one more.
        for _ in 0..=comp.window_frames + 1 {
            last = comp.tick(expected, measured, true);
            if last != 0 {
                break;
            }
        }
        last
    }

    #[test]
    fn test_drift_unlock_forces_init_and_zero() {
        let config = DatapathConfig::default();
        let mut comp = make(&config);

        // Converge to LOCKED first.
        run_window(&mut comp, 0, 10_000);
        assert_eq!(comp.state(), PresState::Locked);

        assert_eq!(comp.tick(10_000, 10_000, false), 0);
        assert_eq!(comp.state(), PresState::Init);

        // Still zero and still INIT while drift stays unlocked.
        assert_eq!(comp.tick(10_000, 2_000, false), 0);
        assert_eq!(comp.state(), PresState::Init);
    }

    #[test]
    fn test_small_error_locks() {
        let config = DatapathConfig::default();
        let mut comp = make(&config);

        let adj = run_window(&mut comp, 300, 10_000);
        assert_eq!(adj, 300);
        assert_eq!(comp.state(), PresState::Locked);

        // Steady state: no further adjustment.
        assert_eq!(comp.tick(10_000, 9_700, true), 0);
        assert_eq!(comp.state(), PresState::Locked);
    }

    #[test]
    fn test_moderate_error_keeps_measuring() {
        // A tight lock threshold below half a block exposes the
        // re-measure path: the error is too small to wait on but too
        // large to lock.
        let config = DatapathConfig::default();
        let mut comp = PresentationCompensator::new(
            PresConfig {
                lock_threshold_us: 200,
                ..config.presentation.clone()
            },
            config.block_us,
            config.remote_data_points(),
            config.wait_frames(),
        );

        let adj = run_window(&mut comp, 300, 10_000);
        assert_eq!(adj, 300);
        assert_eq!(comp.state(), PresState::Meas);
    }

    #[test]
    fn test_block_sized_error_waits_then_remeasures() {
        let config = DatapathConfig::default();
        let mut comp = make(&config);

        let adj = run_window(&mut comp, 700, 10_000);
        assert_eq!(adj, 700);
        assert_eq!(comp.state(), PresState::Wait);

        // WAIT counts one sample-FIFO period of frames, then re-measures.
        for _ in 0..config.wait_frames() + 3 {
            assert_eq!(comp.tick(10_000, 9_300, true), 0);
        }
        assert_eq!(comp.state(), PresState::Meas);
    }

    #[test]
    fn test_force_wait_from_locked() {
        let config = DatapathConfig::default();
        let mut comp = make(&config);
        run_window(&mut comp, 0, 10_000);
        assert_eq!(comp.state(), PresState::Locked);

        comp.force_wait();
        assert_eq!(comp.state(), PresState::Wait);

        for _ in 0..config.wait_frames() + 3 {
            comp.tick(10_000, 10_000, true);
        }
        assert_eq!(comp.state(), PresState::Meas);
    }

    #[test]
    fn test_disabled_reports_zero_but_tracks() {
        let config = DatapathConfig::default();
        let mut comp = PresentationCompensator::new(
            PresConfig {
                enabled: false,
                ..config.presentation.clone()
            },
            config.block_us,
            config.remote_data_points(),
            config.wait_frames(),
        );

        let mut adj = 0;
        for _ in 0..=comp.window_frames + 1 {
            adj = comp.tick(10_000, 9_400, true);
        }
        assert_eq!(adj, 0);
        // The window still completed and measured the error.
        assert_eq!(comp.last_err_us(), 600);
    }
}
