// src/motion/stepper.rs - Open-loop vertical axis pulse generation
use crate::config::{VerticalConfig, VerticalFeedback};
use crate::hardware::{Actuators, Axis, EncoderTrack};
use super::state::ControlShared;

/// Result of one pulse run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRun {
    pub emitted: u64,
    pub aborted: bool,
}

pub fn mm_to_steps(z_mm: i32, steps_per_mm: i32) -> i64 {
    i64::from(z_mm) * i64::from(steps_per_mm)
}

/// Drives the step/dir pair of the vertical axis.
#[derive(Debug, Clone)]
pub struct VerticalDrive {
    config: VerticalConfig,
}

impl VerticalDrive {
    pub fn new(config: VerticalConfig) -> Self {
        Self { config }
    }

    /// Signed steps from the current Vertical counter to `z_mm`.
    pub fn delta_to(&self, tracks: &EncoderTrack, z_mm: i32) -> i64 {
        mm_to_steps(z_mm, self.config.steps_per_mm) - i64::from(tracks.position(Axis::Vertical))
    }

    /// Emit `|delta|` pulses toward the sign of `delta`, checking for a stop
    /// issued since `epoch` before every pulse. Pin faults are logged and the
    /// run continues.
    pub async fn run<A: Actuators>(
        &self,
        actuators: &mut A,
        tracks: &EncoderTrack,
        shared: &ControlShared,
        delta: i64,
        epoch: u64,
    ) -> StepRun {
        let mut run = StepRun { emitted: 0, aborted: false };
        if delta == 0 {
            return run;
        }
        let up = delta > 0;
        let half = self.config.step_half_period();
        if let Err(e) = actuators.set_step_direction(up) {
            tracing::warn!("Failed to set step direction: {}", e);
        }
        tracing::debug!("Vertical run: {} steps {}", delta.unsigned_abs(), if up { "up" } else { "down" });

        for _ in 0..delta.unsigned_abs() {
            if shared.halted_since(epoch) {
                run.aborted = true;
                break;
            }
            if let Err(e) = actuators.set_step_level(true) {
                tracing::warn!("Step pulse failed: {}", e);
            }
            tokio::time::sleep(half).await;
            if let Err(e) = actuators.set_step_level(false) {
                tracing::warn!("Step pulse failed: {}", e);
            }
            tokio::time::sleep(half).await;
            if self.config.feedback == VerticalFeedback::StepCount {
                tracks.record_step(Axis::Vertical, up);
            }
            run.emitted += 1;
        }
        if run.aborted {
            tracing::info!("Vertical run aborted after {} steps", run.emitted);
        }
        run
    }
}
