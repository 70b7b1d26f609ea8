// src/hardware/simulated.rs - Simulated arm backend
//
// Integrates commanded joint speeds into encoder edges that go through the same
// debounce-gated `EncoderTrack::on_edge` path as real GPIO callbacks.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

use crate::config::SimulationConfig;
use super::{Actuators, Axis, ChannelLevels, EdgeClock, EncoderTrack, HardwareError, Joint};

#[derive(Debug, Clone)]
struct SimState {
    joint_speed: [i32; 2],
    joint_angle: [f64; 2],
    /// Motion not yet reported as an encoder edge, in degrees.
    pending: [f64; 2],
    claw_target: i32,
    claw_angle: f64,
    claw_pending: f64,
    step_up: bool,
    step_high: bool,
    pulses: u64,
    net_steps: i64,
    speed_commands: u64,
    stop_all_calls: u64,
}

/// Cloneable handle to a simulated arm. Clones share the same mechanism.
#[derive(Debug, Clone)]
pub struct SimulatedArm {
    state: Arc<Mutex<SimState>>,
    tracks: Arc<EncoderTrack>,
    clock: EdgeClock,
    config: SimulationConfig,
    vertical_encoder: bool,
}

impl SimulatedArm {
    /// `start_angles` is the physical pose of the base and elbow joints.
    /// With `vertical_encoder` every step pulse also produces a Vertical
    /// encoder edge.
    pub fn new(
        tracks: Arc<EncoderTrack>,
        config: SimulationConfig,
        start_angles: [f64; 2],
        claw_start: i32,
        vertical_encoder: bool,
    ) -> Self {
        let state = SimState {
            joint_speed: [0, 0],
            joint_angle: start_angles,
            pending: [0.0, 0.0],
            claw_target: claw_start,
            claw_angle: claw_start as f64,
            claw_pending: 0.0,
            step_up: true,
            step_high: false,
            pulses: 0,
            net_steps: 0,
            speed_commands: 0,
            stop_all_calls: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            tracks,
            clock: EdgeClock::new(),
            config,
            vertical_encoder,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only happens in a failing test; the
        // state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the physics loop that turns joint motion into encoder edges.
    pub fn spawn_physics(&self) -> JoinHandle<()> {
        let sim = self.clone();
        let tick = Duration::from_micros(sim.config.tick_us);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                sim.advance(tick);
            }
        })
    }

    /// Advance the mechanism by `dt` and emit at most one edge per axis.
    pub fn advance(&self, dt: Duration) {
        let dt_s = dt.as_secs_f64();
        let rate = self.config.full_speed_deg_per_s;
        let mut edges: Vec<(Axis, bool)> = Vec::with_capacity(3);
        {
            let mut state = self.lock();
            for joint in Joint::BOTH {
                let i = joint_index(joint);
                let travel = rate * state.joint_speed[i] as f64 / 100.0 * dt_s;
                state.joint_angle[i] += travel;
                state.pending[i] += travel;
                if state.pending[i].abs() >= 1.0 {
                    edges.push((joint.axis(), state.pending[i] > 0.0));
                }
            }

            let claw_error = state.claw_target as f64 - state.claw_angle;
            if claw_error.abs() > f64::EPSILON {
                let travel = claw_error.signum() * (rate * dt_s).min(claw_error.abs());
                state.claw_angle += travel;
                state.claw_pending += travel;
            }
            if state.claw_pending.abs() >= 1.0 {
                edges.push((Axis::Claw, state.claw_pending > 0.0));
            }
        }

        for (axis, forward) in edges {
            let now = self.clock.now_us();
            let counted = self
                .tracks
                .on_edge(axis, now, || ChannelLevels::for_direction(forward));
            if !counted {
                // Held back until the gate reopens on a later tick.
                tracing::trace!("Simulated edge on {:?} deferred by debounce", axis);
                continue;
            }
            self.settle_edge(axis, forward);
            if self.config.bounce_probability > 0.0
                && rand::rng().random_bool(self.config.bounce_probability)
            {
                let bounce = now.wrapping_add(100);
                let counted = self
                    .tracks
                    .on_edge(axis, bounce, || ChannelLevels::for_direction(!forward));
                tracing::trace!("Injected bounce on {:?}, counted={}", axis, counted);
            }
        }
    }

    fn settle_edge(&self, axis: Axis, forward: bool) {
        let delta = if forward { 1.0 } else { -1.0 };
        let mut state = self.lock();
        match axis {
            Axis::Base => state.pending[0] -= delta,
            Axis::Elbow => state.pending[1] -= delta,
            Axis::Claw => state.claw_pending -= delta,
            Axis::Vertical => {}
        }
    }

    pub fn joint_speed(&self, joint: Joint) -> i32 {
        self.lock().joint_speed[joint_index(joint)]
    }

    /// Physical joint angle in degrees.
    pub fn joint_angle(&self, joint: Joint) -> f64 {
        self.lock().joint_angle[joint_index(joint)]
    }

    pub fn claw_target(&self) -> i32 {
        self.lock().claw_target
    }

    pub fn pulses_emitted(&self) -> u64 {
        self.lock().pulses
    }

    pub fn net_steps(&self) -> i64 {
        self.lock().net_steps
    }

    pub fn speed_commands(&self) -> u64 {
        self.lock().speed_commands
    }

    pub fn stop_all_calls(&self) -> u64 {
        self.lock().stop_all_calls
    }
}

fn joint_index(joint: Joint) -> usize {
    match joint {
        Joint::Base => 0,
        Joint::Elbow => 1,
    }
}

impl Actuators for SimulatedArm {
    fn set_joint_speed(&mut self, joint: Joint, speed: i32) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.joint_speed[joint_index(joint)] = speed.clamp(-100, 100);
        state.speed_commands += 1;
        Ok(())
    }

    fn set_claw_angle(&mut self, angle_deg: i32) -> Result<(), HardwareError> {
        self.lock().claw_target = angle_deg.clamp(0, 180);
        Ok(())
    }

    fn set_step_direction(&mut self, up: bool) -> Result<(), HardwareError> {
        self.lock().step_up = up;
        Ok(())
    }

    fn set_step_level(&mut self, high: bool) -> Result<(), HardwareError> {
        let rising = {
            let mut state = self.lock();
            let rising = high && !state.step_high;
            state.step_high = high;
            if rising {
                state.pulses += 1;
                state.net_steps += if state.step_up { 1 } else { -1 };
            }
            rising.then_some(state.step_up)
        };
        if let (Some(up), true) = (rising, self.vertical_encoder) {
            let now = self.clock.now_us();
            self.tracks
                .on_edge(Axis::Vertical, now, || ChannelLevels::for_direction(up));
        }
        Ok(())
    }

    fn stop_all(&mut self) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.joint_speed = [0, 0];
        state.step_high = false;
        state.stop_all_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> (SimulatedArm, Arc<EncoderTrack>) {
        let tracks = Arc::new(EncoderTrack::new(1000));
        let sim = SimulatedArm::new(tracks.clone(), SimulationConfig::default(), [90.0, 90.0], 90, false);
        (sim, tracks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_joint_motion_produces_edges() {
        let (mut sim, tracks) = sim();
        sim.set_joint_speed(Joint::Base, 100).unwrap();
        for _ in 0..100 {
            tokio::time::advance(Duration::from_millis(1)).await;
            sim.advance(Duration::from_millis(1));
        }
        // 180 deg/s for 100ms
        assert!((sim.joint_angle(Joint::Base) - 108.0).abs() < 1e-6);
        let counted = tracks.position(Axis::Base);
        assert!((17..=18).contains(&counted), "counted {counted}");
        assert_eq!(tracks.position(Axis::Elbow), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_motion_counts_down() {
        let (mut sim, tracks) = sim();
        sim.set_joint_speed(Joint::Elbow, -100).unwrap();
        for _ in 0..50 {
            tokio::time::advance(Duration::from_millis(1)).await;
            sim.advance(Duration::from_millis(1));
        }
        assert!(tracks.position(Axis::Elbow) < 0);
    }

    #[test]
    fn test_step_pulses_counted_on_rising_edge() {
        let (mut sim, tracks) = sim();
        sim.set_step_direction(false).unwrap();
        for _ in 0..3 {
            sim.set_step_level(true).unwrap();
            sim.set_step_level(true).unwrap();
            sim.set_step_level(false).unwrap();
        }
        assert_eq!(sim.pulses_emitted(), 3);
        assert_eq!(sim.net_steps(), -3);
        // No stepper encoder on this sim.
        assert_eq!(tracks.position(Axis::Vertical), 0);
    }

    #[test]
    fn test_stop_all_zeroes_speeds() {
        let (mut sim, _) = sim();
        sim.set_joint_speed(Joint::Base, 60).unwrap();
        sim.set_joint_speed(Joint::Elbow, -60).unwrap();
        sim.stop_all().unwrap();
        assert_eq!(sim.joint_speed(Joint::Base), 0);
        assert_eq!(sim.joint_speed(Joint::Elbow), 0);
        assert_eq!(sim.stop_all_calls(), 1);
    }
}
