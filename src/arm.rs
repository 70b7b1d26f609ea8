// src/arm.rs - Arm assembly: control task, telemetry and the submit handle
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::command::Intent;
use crate::config::Config;
use crate::hardware::{Actuators, Axis, EncoderReadings, EncoderTrack, HardwareError, SimulatedArm};
use crate::motion::{ControlShared, MotionExecutor, MotionPhase};
use crate::telemetry::{self, Telemetry, TelemetryHub};

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("Target unreachable at distance {distance:.3}")]
    Unreachable { distance: f64 },
    #[error("Target distance {distance:.3} exceeds safe reach {limit:.3}")]
    ExceedsSafeReach { distance: f64, limit: f64 },
    #[error("{axis:?} angle {angle} outside [{min}, {max}]")]
    JointLimitExceeded { axis: Axis, angle: i32, min: i32, max: i32 },
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Arm is stopped; send resume first")]
    Halted,
    #[error("Joints did not converge (base error {base_error}, elbow error {elbow_error})")]
    ConvergenceTimeout { base_error: i32, elbow_error: i32 },
    #[error("Control loop is not running")]
    ControlLoopClosed,
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

impl ArmError {
    /// Stable name reported in telemetry outcomes.
    pub fn name(&self) -> &'static str {
        match self {
            ArmError::Unreachable { .. } => "unreachable",
            ArmError::ExceedsSafeReach { .. } => "exceeds_safe_reach",
            ArmError::JointLimitExceeded { .. } => "joint_limit_exceeded",
            ArmError::InvalidCommand(_) => "invalid_command",
            ArmError::Halted => "halted",
            ArmError::ConvergenceTimeout { .. } => "convergence_timeout",
            ArmError::ControlLoopClosed => "control_loop_closed",
            ArmError::Hardware(_) => "hardware",
        }
    }
}

/// How an accepted request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// Cut short by a stop or by a newer motion command.
    Interrupted,
    /// Dropped before starting because a newer move was submitted.
    Superseded,
}

pub type Reply = oneshot::Sender<Result<Outcome, ArmError>>;

/// Request sent to the control task.
#[derive(Debug)]
pub struct ArmRequest {
    pub intent: Intent,
    /// Move sequence number, for moves and direct control.
    pub seq: Option<u64>,
    /// Emergency-stop epoch at submission.
    pub epoch: u64,
    pub respond_to: Option<Reply>,
}

/// Cloneable front door to a running arm.
#[derive(Debug, Clone)]
pub struct ArmHandle {
    tx: mpsc::UnboundedSender<ArmRequest>,
    shared: Arc<ControlShared>,
    tracks: Arc<EncoderTrack>,
    telemetry: TelemetryHub,
}

impl ArmHandle {
    pub fn new(
        tx: mpsc::UnboundedSender<ArmRequest>,
        shared: Arc<ControlShared>,
        tracks: Arc<EncoderTrack>,
        telemetry: TelemetryHub,
    ) -> Self {
        Self { tx, shared, tracks, telemetry }
    }

    /// Queue an intent and return the receiver for its result.
    ///
    /// A motion intent raises the stop flag when a move is in flight so the
    /// running convergence loop yields. During calibration it just waits.
    pub fn submit(&self, intent: Intent) -> Result<oneshot::Receiver<Result<Outcome, ArmError>>, ArmError> {
        let (respond_to, rx) = oneshot::channel();
        if intent == Intent::Stop {
            self.stop_with_reply(Some(respond_to))?;
            return Ok(rx);
        }
        let seq = intent.is_sequenced().then(|| self.shared.next_move_seq());
        if intent.is_motion() && self.shared.phase() == MotionPhase::Moving {
            tracing::debug!("Preempting active move for {}", intent.name());
            self.shared.raise_stop();
        }
        let request = ArmRequest {
            intent,
            seq,
            epoch: self.shared.epoch(),
            respond_to: Some(respond_to),
        };
        self.tx.send(request).map_err(|_| ArmError::ControlLoopClosed)?;
        Ok(rx)
    }

    /// Submit and wait for the control task to finish the intent.
    pub async fn execute(&self, intent: Intent) -> Result<Outcome, ArmError> {
        let rx = self.submit(intent)?;
        rx.await.map_err(|_| ArmError::ControlLoopClosed)?
    }

    /// Raise the stop flag right away and queue the stop behind it. Does not
    /// wait for the control task.
    pub fn emergency_stop(&self) -> Result<(), ArmError> {
        self.stop_with_reply(None)
    }

    fn stop_with_reply(&self, respond_to: Option<Reply>) -> Result<(), ArmError> {
        let epoch = self.shared.request_emergency_stop();
        tracing::warn!("Emergency stop requested (epoch {})", epoch);
        let request = ArmRequest { intent: Intent::Stop, seq: None, epoch, respond_to };
        self.tx.send(request).map_err(|_| ArmError::ControlLoopClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Telemetry> {
        self.telemetry.subscribe()
    }

    /// Latest operation record with live encoder readings and phase.
    pub fn snapshot(&self) -> Telemetry {
        let mut record = self.telemetry.latest();
        record.encoders = self.tracks.readings();
        record.state = self.shared.phase();
        record
    }

    pub fn encoder_readings(&self) -> EncoderReadings {
        self.tracks.readings()
    }

    pub fn phase(&self) -> MotionPhase {
        self.shared.phase()
    }
}

/// A running arm: control task, telemetry cadence and optional simulation.
pub struct Arm {
    config: Config,
    handle: ArmHandle,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    physics: Option<JoinHandle<()>>,
}

impl Arm {
    /// Spawn the control task over `actuators`. `tracks` must be the encoder
    /// arena the hardware binding feeds.
    pub fn start<A>(config: Config, actuators: A, tracks: Arc<EncoderTrack>) -> Self
    where
        A: Actuators + 'static,
    {
        tracing::info!("Starting arm '{}'", config.arm.name);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ControlShared::new());
        let executor = MotionExecutor::new(&config, actuators, tracks.clone(), shared.clone());
        let hub = executor.telemetry();
        let handle = ArmHandle::new(tx, shared.clone(), tracks.clone(), hub.clone());

        let control = tokio::spawn(executor.run(rx, shutdown_tx.subscribe()));
        let cadence = telemetry::spawn_cadence(
            hub,
            tracks,
            shared,
            config.transport.telemetry_hz,
            shutdown_tx.subscribe(),
        );
        Self {
            config,
            handle,
            shutdown_tx,
            tasks: vec![control, cadence],
            physics: None,
        }
    }

    /// Arm over the simulated backend, with its physics task running. The
    /// joints start at the calibration reference pose.
    pub fn simulated(config: Config) -> (Self, SimulatedArm) {
        let tracks = Arc::new(EncoderTrack::new(config.encoder.debounce_us));
        let sim = SimulatedArm::new(
            tracks.clone(),
            config.hardware.simulation.clone(),
            [
                f64::from(config.calibration.reference_base_deg),
                f64::from(config.calibration.reference_elbow_deg),
            ],
            config.calibration.home_claw_deg,
            config.vertical.feedback == crate::config::VerticalFeedback::Encoder,
        );
        let physics = sim.spawn_physics();
        let mut arm = Self::start(config, sim.clone(), tracks);
        arm.physics = Some(physics);
        (arm, sim)
    }

    pub fn handle(&self) -> ArmHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn shutdown(mut self) {
        tracing::info!("Shutting down arm");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Arm task ended abnormally: {}", e);
            }
        }
        if let Some(physics) = self.physics.take() {
            physics.abort();
        }
    }
}
