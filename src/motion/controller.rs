// src/motion/controller.rs - Motion executor: calibration, moves and stops
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::arm::{ArmError, ArmRequest, Outcome};
use crate::command::{DirectCommand, Intent};
use crate::config::{CalibrationConfig, Config, MotionConfig, ResumePolicy};
use crate::hardware::{Actuators, Axis, EncoderTrack, Joint};
use crate::telemetry::{OperationOutcome, Telemetry, TelemetryEvent, TelemetryHub};
use super::kinematics::{self, JointTarget, MoveRequest};
use super::safety::SafetyEnvelope;
use super::state::{CommandedPose, ControlShared, MotionState};
use super::stepper::VerticalDrive;

/// Shortest signed rotation from `current_deg` to `target_deg`, in [-180, 180).
pub fn shortest_error(target_deg: i32, current_deg: i32) -> i32 {
    (target_deg - current_deg.rem_euclid(360) + 540).rem_euclid(360) - 180
}

/// Two-speed bang-bang law: full speed outside the slow zone, slow speed
/// inside it, zero within tolerance.
pub fn bang_bang(error_deg: i32, motion: &MotionConfig) -> i32 {
    let magnitude = error_deg.abs();
    let speed = if magnitude >= motion.slow_zone_deg {
        motion.full_speed
    } else if magnitude > motion.tolerance_deg {
        motion.slow_speed
    } else {
        0
    };
    speed * error_deg.signum()
}

/// Why the convergence loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Convergence {
    Reached,
    Stopped,
    Superseded,
    TimedOut { base_error: i32, elbow_error: i32 },
}

/// Identity of a request for preemption checks.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    seq: Option<u64>,
    epoch: u64,
}

pub struct MotionExecutor<A: Actuators> {
    actuators: A,
    tracks: Arc<EncoderTrack>,
    shared: Arc<ControlShared>,
    envelope: SafetyEnvelope,
    vertical: VerticalDrive,
    motion: MotionConfig,
    calibration: CalibrationConfig,
    state: MotionState,
    commanded: CommandedPose,
    telemetry: TelemetryHub,
}

impl<A: Actuators> MotionExecutor<A> {
    pub fn new(config: &Config, actuators: A, tracks: Arc<EncoderTrack>, shared: Arc<ControlShared>) -> Self {
        let envelope = SafetyEnvelope::new(&config.arm);
        let commanded = home_pose(&config.calibration);
        let telemetry = TelemetryHub::new(Telemetry {
            encoders: tracks.readings(),
            commanded,
            effective_max_reach: envelope.effective_max_reach(),
            state: MotionState::Idle.phase(),
            outcome: OperationOutcome::ok(),
            event: TelemetryEvent::Startup,
            timestamp: Utc::now(),
        });
        shared.set_phase(MotionState::Idle.phase());
        Self {
            actuators,
            tracks,
            shared,
            envelope,
            vertical: VerticalDrive::new(config.vertical.clone()),
            motion: config.motion.clone(),
            calibration: config.calibration.clone(),
            state: MotionState::Idle,
            commanded,
            telemetry,
        }
    }

    pub fn telemetry(&self) -> TelemetryHub {
        self.telemetry.clone()
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn envelope(&self) -> &SafetyEnvelope {
        &self.envelope
    }

    pub fn commanded(&self) -> CommandedPose {
        self.commanded
    }

    /// Control task: serve requests one at a time until shutdown or until
    /// every handle is gone.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ArmRequest>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tracing::info!("Motion control loop started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Motion control loop shutting down");
                    break;
                }
                request = rx.recv() => {
                    let Some(request) = request else {
                        tracing::info!("All arm handles dropped");
                        break;
                    };
                    self.serve(request).await;
                }
            }
        }
        if let Err(e) = self.actuators.stop_all() {
            tracing::warn!("Failed to neutralise actuators on exit: {}", e);
        }
    }

    async fn serve(&mut self, request: ArmRequest) {
        let ArmRequest { intent, seq, epoch, respond_to } = request;
        let ticket = Ticket { seq, epoch };
        let result = if intent != Intent::Stop && epoch < self.shared.epoch() {
            tracing::debug!("Dropping {} queued before an emergency stop", intent.name());
            Ok(Outcome::Interrupted)
        } else if self.is_superseded(ticket) {
            tracing::debug!("Dropping superseded {}", intent.name());
            Ok(Outcome::Superseded)
        } else {
            self.perform(intent, ticket).await
        };
        if let Some(tx) = respond_to {
            // The submitter may have stopped waiting.
            let _ = tx.send(result);
        }
    }

    /// Run one intent to completion as the newest request.
    pub async fn dispatch(&mut self, intent: Intent) -> Result<Outcome, ArmError> {
        let ticket = self.current_ticket();
        self.perform(intent, ticket).await
    }

    async fn perform(&mut self, intent: Intent, ticket: Ticket) -> Result<Outcome, ArmError> {
        let result = match intent {
            Intent::MoveTo(request) => self.move_to_with(request, ticket).await,
            Intent::Calibrate => self.calibrate_with(ticket).await,
            Intent::Stop => self.emergency_stop(),
            Intent::Resume => self.resume(),
            Intent::DirectControl(command) => self.direct_control_with(command, ticket).await,
        };
        if let Err(e) = &result {
            tracing::warn!("{} rejected: {}", intent.name(), e);
            self.publish(TelemetryEvent::Rejected, OperationOutcome::failed(e.name(), e.to_string()));
        }
        result
    }

    pub async fn calibrate(&mut self) -> Result<Outcome, ArmError> {
        let ticket = self.current_ticket();
        self.calibrate_with(ticket).await
    }

    pub async fn move_to(&mut self, request: MoveRequest) -> Result<Outcome, ArmError> {
        let ticket = self.current_ticket();
        self.move_to_with(request, ticket).await
    }

    pub async fn direct_control(&mut self, command: DirectCommand) -> Result<Outcome, ArmError> {
        let ticket = self.current_ticket();
        self.direct_control_with(command, ticket).await
    }

    /// Neutralise every actuator and enter `Stopped`. Never refused.
    pub fn emergency_stop(&mut self) -> Result<Outcome, ArmError> {
        self.shared.raise_stop();
        if let Err(e) = self.actuators.stop_all() {
            tracing::warn!("Actuator fault during emergency stop: {}", e);
        }
        self.set_state(MotionState::Stopped);
        tracing::warn!("All movement halted");
        self.publish(TelemetryEvent::Stopped, OperationOutcome::ok());
        Ok(Outcome::Completed)
    }

    /// Clear the stop flag and leave `Stopped`.
    pub fn resume(&mut self) -> Result<Outcome, ArmError> {
        self.shared.clear_stop();
        if self.state == MotionState::Stopped {
            tracing::info!("Resuming from stop");
            self.set_state(MotionState::Idle);
        }
        self.publish(TelemetryEvent::Resumed, OperationOutcome::ok());
        Ok(Outcome::Completed)
    }

    async fn calibrate_with(&mut self, ticket: Ticket) -> Result<Outcome, ArmError> {
        self.ensure_runnable()?;
        if !self.preempt(ticket).await {
            return Ok(Outcome::Interrupted);
        }
        tracing::info!("Calibrating");
        self.set_state(MotionState::Calibrating);
        self.tracks.reset_all();
        self.commanded = home_pose(&self.calibration);
        let reach = self.envelope.apply_calibration();
        self.command_claw(self.calibration.home_claw_deg);

        let home = JointTarget {
            base_deg: self.calibration.home_base_deg,
            elbow_deg: self.calibration.home_elbow_deg,
        };
        // Moves submitted meanwhile wait; only a stop cuts calibration short.
        let homing = Ticket { seq: None, epoch: ticket.epoch };
        match self.converge(home, homing).await {
            Convergence::Reached => {
                self.set_state(MotionState::Idle);
                tracing::info!("Calibration complete, reach {:.2}", reach);
                self.publish(TelemetryEvent::Calibrated, OperationOutcome::ok());
                Ok(Outcome::Completed)
            }
            other => self.finish_early(other),
        }
    }

    async fn move_to_with(&mut self, request: MoveRequest, ticket: Ticket) -> Result<Outcome, ArmError> {
        self.ensure_runnable()?;
        if !self.preempt(ticket).await {
            return Ok(Outcome::Interrupted);
        }
        if self.is_superseded(ticket) {
            return Ok(Outcome::Superseded);
        }
        self.set_state(MotionState::Idle);

        let target = kinematics::solve(&self.envelope, request.x, request.y)?;
        tracing::info!(
            "Moving to ({:.2}, {:.2}, {}) -> base {} elbow {}",
            request.x, request.y, request.z, target.base_deg, target.elbow_deg
        );
        self.set_state(MotionState::Moving { target, started_at: Instant::now() });
        match self.drive(target, request.z, ticket).await {
            Convergence::Reached => {
                self.commanded.base_deg = target.base_deg;
                self.commanded.elbow_deg = target.elbow_deg;
                self.commanded.z_mm = request.z;
                self.set_state(MotionState::Idle);
                let event = TelemetryEvent::Reached { x: request.x, y: request.y, z: request.z };
                self.publish(event, OperationOutcome::ok());
                Ok(Outcome::Completed)
            }
            other => self.finish_early(other),
        }
    }

    async fn direct_control_with(&mut self, command: DirectCommand, ticket: Ticket) -> Result<Outcome, ArmError> {
        self.ensure_runnable()?;
        if !self.preempt(ticket).await {
            return Ok(Outcome::Interrupted);
        }
        if self.is_superseded(ticket) {
            return Ok(Outcome::Superseded);
        }
        self.set_state(MotionState::Idle);

        self.envelope.check_joint_angle(Axis::Base, command.base)?;
        self.envelope.check_joint_angle(Axis::Elbow, command.elbow)?;
        self.envelope.check_joint_angle(Axis::Claw, command.claw)?;
        let target = JointTarget { base_deg: command.base, elbow_deg: command.elbow };
        tracing::info!("Direct control: {:?}", command);
        self.set_state(MotionState::Moving { target, started_at: Instant::now() });
        self.command_claw(command.claw);
        match self.drive(target, command.z, ticket).await {
            Convergence::Reached => {
                self.commanded = CommandedPose {
                    base_deg: command.base,
                    elbow_deg: command.elbow,
                    claw_deg: command.claw,
                    z_mm: command.z,
                };
                self.set_state(MotionState::Idle);
                self.publish(TelemetryEvent::DirectReached, OperationOutcome::ok());
                Ok(Outcome::Completed)
            }
            other => self.finish_early(other),
        }
    }

    /// Vertical run, then joint convergence.
    async fn drive(&mut self, target: JointTarget, z_mm: i32, ticket: Ticket) -> Convergence {
        let delta = self.vertical.delta_to(&self.tracks, z_mm);
        let run = self
            .vertical
            .run(&mut self.actuators, &self.tracks, &self.shared, delta, ticket.epoch)
            .await;
        if run.aborted {
            return Convergence::Stopped;
        }
        self.converge(target, ticket).await
    }

    /// Closed-loop bang-bang drive of base and elbow. Both joints are
    /// commanded to zero before returning, whatever the exit reason.
    async fn converge(&mut self, target: JointTarget, ticket: Ticket) -> Convergence {
        let started = Instant::now();
        let period = self.motion.loop_period();
        let timeout = self.motion.convergence_timeout();
        let tolerance = self.motion.tolerance_deg;

        let result = loop {
            if self.shared.halted_since(ticket.epoch) {
                break Convergence::Stopped;
            }
            if self.is_superseded(ticket) {
                break Convergence::Superseded;
            }
            let base_error = shortest_error(target.base_deg, self.joint_angle(Joint::Base));
            let elbow_error = shortest_error(target.elbow_deg, self.joint_angle(Joint::Elbow));
            if base_error.abs() <= tolerance && elbow_error.abs() <= tolerance {
                break Convergence::Reached;
            }
            if started.elapsed() >= timeout {
                break Convergence::TimedOut { base_error, elbow_error };
            }
            self.command_speed(Joint::Base, bang_bang(base_error, &self.motion));
            self.command_speed(Joint::Elbow, bang_bang(elbow_error, &self.motion));
            tracing::trace!("Converging: base err {} elbow err {}", base_error, elbow_error);
            tokio::time::sleep(period).await;
        };

        self.command_speed(Joint::Base, 0);
        self.command_speed(Joint::Elbow, 0);
        tracing::debug!("Convergence ended: {:?} after {:?}", result, started.elapsed());
        result
    }

    fn finish_early(&mut self, convergence: Convergence) -> Result<Outcome, ArmError> {
        self.set_state(MotionState::Idle);
        match convergence {
            Convergence::TimedOut { base_error, elbow_error } => {
                Err(ArmError::ConvergenceTimeout { base_error, elbow_error })
            }
            Convergence::Stopped | Convergence::Superseded | Convergence::Reached => {
                tracing::info!("Motion interrupted ({:?})", convergence);
                self.publish(TelemetryEvent::Interrupted, OperationOutcome::ok());
                Ok(Outcome::Interrupted)
            }
        }
    }

    /// Stop any in-flight pulse, let it settle, then re-arm. Returns false when
    /// an emergency stop arrived during the settle; the flag is left raised.
    async fn preempt(&mut self, ticket: Ticket) -> bool {
        self.shared.raise_stop();
        tokio::time::sleep(self.motion.preempt_settle()).await;
        if !self.shared.rearm(ticket.epoch) {
            tracing::debug!("Emergency stop during preemption");
            return false;
        }
        true
    }

    fn ensure_runnable(&self) -> Result<(), ArmError> {
        if self.state == MotionState::Stopped && self.motion.resume_policy == ResumePolicy::Explicit {
            return Err(ArmError::Halted);
        }
        Ok(())
    }

    fn is_superseded(&self, ticket: Ticket) -> bool {
        ticket.seq.is_some_and(|seq| seq < self.shared.latest_move_seq())
    }

    fn current_ticket(&self) -> Ticket {
        Ticket { seq: None, epoch: self.shared.epoch() }
    }

    /// Joint angle from the calibration reference plus counted degrees.
    fn joint_angle(&self, joint: Joint) -> i32 {
        let reference = match joint {
            Joint::Base => self.calibration.reference_base_deg,
            Joint::Elbow => self.calibration.reference_elbow_deg,
        };
        reference + self.tracks.position(joint.axis())
    }

    fn command_speed(&mut self, joint: Joint, speed: i32) {
        if let Err(e) = self.actuators.set_joint_speed(joint, speed) {
            tracing::warn!("Failed to set {:?} speed {}: {}", joint, speed, e);
        }
    }

    fn command_claw(&mut self, angle: i32) {
        if let Err(e) = self.actuators.set_claw_angle(angle) {
            tracing::warn!("Failed to set claw angle {}: {}", angle, e);
        }
    }

    fn set_state(&mut self, state: MotionState) {
        self.state = state;
        self.shared.set_phase(state.phase());
    }

    fn publish(&self, event: TelemetryEvent, outcome: OperationOutcome) {
        self.telemetry.publish(Telemetry {
            encoders: self.tracks.readings(),
            commanded: self.commanded,
            effective_max_reach: self.envelope.effective_max_reach(),
            state: self.state.phase(),
            outcome,
            event,
            timestamp: Utc::now(),
        });
    }
}

fn home_pose(calibration: &CalibrationConfig) -> CommandedPose {
    CommandedPose {
        base_deg: calibration.home_base_deg,
        elbow_deg: calibration.home_elbow_deg,
        claw_deg: calibration.home_claw_deg,
        z_mm: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedArm;
    use crate::motion::MotionPhase;

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_without_control_task() {
        let config = Config::default();
        let tracks = Arc::new(EncoderTrack::new(config.encoder.debounce_us));
        let sim = SimulatedArm::new(tracks.clone(), config.hardware.simulation.clone(), [90.0, 90.0], 90, false);
        let shared = Arc::new(ControlShared::new());
        let mut executor = MotionExecutor::new(&config, sim.clone(), tracks, shared.clone());

        assert_eq!(executor.dispatch(Intent::Calibrate).await.unwrap(), Outcome::Completed);
        assert!(executor.envelope().is_calibrated());
        assert_eq!(executor.telemetry().latest().effective_max_reach, 22.7);

        let err = executor
            .dispatch(Intent::MoveTo(MoveRequest { x: 10.0, y: 5.0, z: 3 }))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "joint_limit_exceeded");
        assert_eq!(executor.state(), MotionState::Idle);
        assert_eq!(sim.pulses_emitted(), 0);

        assert_eq!(executor.dispatch(Intent::Stop).await.unwrap(), Outcome::Completed);
        assert_eq!(executor.state(), MotionState::Stopped);
        assert_eq!(shared.phase(), MotionPhase::Stopped);
        assert!(shared.stop_requested());
        assert_eq!(executor.telemetry().latest().event, TelemetryEvent::Stopped);

        executor.dispatch(Intent::Resume).await.unwrap();
        assert_eq!(executor.state(), MotionState::Idle);
        assert!(!shared.stop_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_during_preempt_settle_stays_raised() {
        let config = Config::default();
        let tracks = Arc::new(EncoderTrack::new(config.encoder.debounce_us));
        let sim = SimulatedArm::new(tracks.clone(), config.hardware.simulation.clone(), [90.0, 90.0], 90, false);
        let shared = Arc::new(ControlShared::new());
        let mut executor = MotionExecutor::new(&config, sim.clone(), tracks, shared.clone());

        let stopper = {
            let shared = shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                shared.request_emergency_stop();
            })
        };
        assert_eq!(executor.dispatch(Intent::Calibrate).await.unwrap(), Outcome::Interrupted);
        stopper.await.unwrap();

        assert!(shared.stop_requested());
        assert!(!executor.envelope().is_calibrated());
        assert_eq!(sim.speed_commands(), 0);
    }

    #[test]
    fn test_shortest_error_wraps() {
        assert_eq!(shortest_error(10, 350), 20);
        assert_eq!(shortest_error(350, 10), -20);
        assert_eq!(shortest_error(90, 90), 0);
        assert_eq!(shortest_error(0, 180), -180);
        assert_eq!(shortest_error(45, -315), 0);
        assert_eq!(shortest_error(100, 725), 95);
    }

    #[test]
    fn test_bang_bang_bands() {
        let motion = MotionConfig::default();
        assert_eq!(bang_bang(120, &motion), 100);
        assert_eq!(bang_bang(-30, &motion), -100);
        assert_eq!(bang_bang(29, &motion), 30);
        assert_eq!(bang_bang(-6, &motion), -30);
        assert_eq!(bang_bang(5, &motion), 0);
        assert_eq!(bang_bang(-5, &motion), 0);
        assert_eq!(bang_bang(0, &motion), 0);
    }
}
