// src/command/mod.rs - Intents accepted by the motion executor
pub mod parser;

pub use parser::parse_command;

use serde::{Deserialize, Serialize};

use crate::motion::MoveRequest;

/// Raw joint override for maintenance. Bypasses kinematics but not the joint
/// bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectCommand {
    pub base: i32,
    pub elbow: i32,
    pub claw: i32,
    pub z: i32,
}

/// One inbound command, mapped 1:1 onto an executor operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intent {
    MoveTo(MoveRequest),
    Calibrate,
    Stop,
    Resume,
    DirectControl(DirectCommand),
}

impl Intent {
    /// Intents that start actuator motion and therefore preempt a running move.
    pub fn is_motion(&self) -> bool {
        matches!(self, Intent::MoveTo(_) | Intent::DirectControl(_) | Intent::Calibrate)
    }

    /// Intents numbered for supersession.
    pub fn is_sequenced(&self) -> bool {
        matches!(self, Intent::MoveTo(_) | Intent::DirectControl(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::MoveTo(_) => "move_to",
            Intent::Calibrate => "calibrate",
            Intent::Stop => "stop",
            Intent::Resume => "resume",
            Intent::DirectControl(_) => "direct_control",
        }
    }
}
