// src/lib.rs - Robotic arm motion control host
pub mod arm;
pub mod command;
pub mod communication;
pub mod config;
pub mod hardware;
pub mod motion;
pub mod telemetry;
pub mod web;

pub use arm::{Arm, ArmError, ArmHandle, Outcome};
pub use config::{load_config, Config};
