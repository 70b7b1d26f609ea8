// src/motion/mod.rs - Kinematics, safety limits and the motion executor
pub mod controller;
pub mod kinematics;
pub mod safety;
pub mod state;
pub mod stepper;

pub use controller::{bang_bang, shortest_error, MotionExecutor};
pub use kinematics::{forward, rad_to_deg_truncated, solve, solve_radians, JointTarget, MoveRequest};
pub use safety::SafetyEnvelope;
pub use state::{CommandedPose, ControlShared, MotionPhase, MotionState};
pub use stepper::{mm_to_steps, StepRun, VerticalDrive};
