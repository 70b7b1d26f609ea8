// src/hardware/mod.rs - Actuator interface and encoder tracking
pub mod encoder;
pub mod simulated;
#[cfg(feature = "rpi")]
pub mod rpi;

pub use encoder::{ChannelLevels, EncoderReadings, EncoderTrack};
pub use simulated::SimulatedArm;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO error: {0}")]
    Gpio(String),
}

/// One actuator together with its encoder channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Base,
    Elbow,
    Claw,
    Vertical,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Base, Axis::Elbow, Axis::Claw, Axis::Vertical];

    pub const fn index(self) -> usize {
        match self {
            Axis::Base => 0,
            Axis::Elbow => 1,
            Axis::Claw => 2,
            Axis::Vertical => 3,
        }
    }
}

/// Continuous-rotation joints driven by the convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    Base,
    Elbow,
}

impl Joint {
    pub const BOTH: [Joint; 2] = [Joint::Base, Joint::Elbow];

    pub const fn axis(self) -> Axis {
        match self {
            Joint::Base => Axis::Base,
            Joint::Elbow => Axis::Elbow,
        }
    }
}

/// Output side of the arm. Implementations only translate commands into
/// pin activity; nothing here waits for the mechanism.
pub trait Actuators: Send {
    /// Signed speed in -100..=100 for a continuous-rotation joint, 0 is neutral.
    fn set_joint_speed(&mut self, joint: Joint, speed: i32) -> Result<(), HardwareError>;

    /// Absolute angle for the positional claw servo.
    fn set_claw_angle(&mut self, angle_deg: i32) -> Result<(), HardwareError>;

    fn set_step_direction(&mut self, up: bool) -> Result<(), HardwareError>;

    fn set_step_level(&mut self, high: bool) -> Result<(), HardwareError>;

    /// Neutral output on every actuator.
    fn stop_all(&mut self) -> Result<(), HardwareError>;
}

impl<A: Actuators + ?Sized> Actuators for Box<A> {
    fn set_joint_speed(&mut self, joint: Joint, speed: i32) -> Result<(), HardwareError> {
        (**self).set_joint_speed(joint, speed)
    }

    fn set_claw_angle(&mut self, angle_deg: i32) -> Result<(), HardwareError> {
        (**self).set_claw_angle(angle_deg)
    }

    fn set_step_direction(&mut self, up: bool) -> Result<(), HardwareError> {
        (**self).set_step_direction(up)
    }

    fn set_step_level(&mut self, high: bool) -> Result<(), HardwareError> {
        (**self).set_step_level(high)
    }

    fn stop_all(&mut self) -> Result<(), HardwareError> {
        (**self).stop_all()
    }
}

/// Microsecond timestamp source for edge events. Wraps like a hardware tick
/// counter; the debounce arithmetic is wrap-safe.
#[derive(Debug, Clone, Copy)]
pub struct EdgeClock {
    origin: tokio::time::Instant,
}

impl EdgeClock {
    pub fn new() -> Self {
        Self { origin: tokio::time::Instant::now() }
    }

    pub fn now_us(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

impl Default for EdgeClock {
    fn default() -> Self {
        Self::new()
    }
}
