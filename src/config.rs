//! # Arm Configuration
//!
//! Geometry, loop tuning, encoder, calibration, hardware and transport settings,
//! loaded from a single TOML file. Every field has a default, so an empty file
//! describes the reference arm.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [arm]
//! name = "bench-arm"
//! link1 = 13.7
//! link2 = 10.0
//! safety_margin = 1.0
//!
//! [motion]
//! tolerance_deg = 5
//! resume_policy = "explicit"
//!
//! [vertical]
//! steps_per_mm = 100
//! feedback = "encoder"
//!
//! [transport]
//! http_bind = "0.0.0.0:8080"
//! serial_port = "/dev/ttyUSB0"
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the arm, its control loop and its transports.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub arm: ArmConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub vertical: VerticalConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Link lengths (cm) and joint bounds (degrees).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArmConfig {
    #[serde(default = "default_arm_name")]
    pub name: String,
    #[serde(default = "default_link1")]
    pub link1: f64,
    #[serde(default = "default_link2")]
    pub link2: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default = "default_joint_min")]
    pub joint_min_deg: i32,
    #[serde(default = "default_joint_max")]
    pub joint_max_deg: i32,
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            name: default_arm_name(),
            link1: default_link1(),
            link2: default_link2(),
            safety_margin: default_safety_margin(),
            joint_min_deg: default_joint_min(),
            joint_max_deg: default_joint_max(),
        }
    }
}

/// What a move or calibration does when the arm is `Stopped`.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// A new move or calibration clears the stop and proceeds.
    #[default]
    Auto,
    /// Only an explicit `resume` leaves `Stopped`.
    Explicit,
}

/// Convergence loop and preemption tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionConfig {
    #[serde(default = "default_loop_period_ms")]
    pub loop_period_ms: u64,
    #[serde(default = "default_full_speed")]
    pub full_speed: i32,
    #[serde(default = "default_slow_speed")]
    pub slow_speed: i32,
    #[serde(default = "default_slow_zone")]
    pub slow_zone_deg: i32,
    #[serde(default = "default_tolerance")]
    pub tolerance_deg: i32,
    #[serde(default = "default_preempt_settle_ms")]
    pub preempt_settle_ms: u64,
    #[serde(default = "default_convergence_timeout_ms")]
    pub convergence_timeout_ms: u64,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: default_loop_period_ms(),
            full_speed: default_full_speed(),
            slow_speed: default_slow_speed(),
            slow_zone_deg: default_slow_zone(),
            tolerance_deg: default_tolerance(),
            preempt_settle_ms: default_preempt_settle_ms(),
            convergence_timeout_ms: default_convergence_timeout_ms(),
            resume_policy: ResumePolicy::default(),
        }
    }
}

impl MotionConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }

    pub fn preempt_settle(&self) -> Duration {
        Duration::from_millis(self.preempt_settle_ms)
    }

    pub fn convergence_timeout(&self) -> Duration {
        Duration::from_millis(self.convergence_timeout_ms)
    }
}

/// Source of truth for the Vertical counter.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerticalFeedback {
    /// Each emitted step pulse moves the counter by one.
    #[default]
    StepCount,
    /// Only encoder edges move the counter.
    Encoder,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerticalConfig {
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: i32,
    #[serde(default = "default_step_half_period_us")]
    pub step_half_period_us: u64,
    #[serde(default)]
    pub feedback: VerticalFeedback,
}

impl Default for VerticalConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            step_half_period_us: default_step_half_period_us(),
            feedback: VerticalFeedback::default(),
        }
    }
}

impl VerticalConfig {
    pub fn step_half_period(&self) -> Duration {
        Duration::from_micros(self.step_half_period_us)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    #[serde(default = "default_debounce_us")]
    pub debounce_us: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { debounce_us: default_debounce_us() }
    }
}

/// Home pose and the joint angles at which calibration zeroes the counters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_home_deg")]
    pub home_base_deg: i32,
    #[serde(default = "default_home_deg")]
    pub home_elbow_deg: i32,
    #[serde(default = "default_home_deg")]
    pub home_claw_deg: i32,
    #[serde(default = "default_home_deg")]
    pub reference_base_deg: i32,
    #[serde(default = "default_home_deg")]
    pub reference_elbow_deg: i32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            home_base_deg: default_home_deg(),
            home_elbow_deg: default_home_deg(),
            home_claw_deg: default_home_deg(),
            reference_base_deg: default_home_deg(),
            reference_elbow_deg: default_home_deg(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HardwareBackend {
    #[default]
    Simulated,
    Rpi,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HardwareConfig {
    #[serde(default)]
    pub backend: HardwareBackend,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Broadcom pin numbers for the Raspberry Pi backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PinConfig {
    pub step: u8,
    pub dir: u8,
    /// Two servos share the base joint and are driven with the same speed.
    pub base_servos: [u8; 2],
    pub elbow_servo: u8,
    pub claw_servo: u8,
    #[serde(default = "default_true")]
    pub elbow_inverted: bool,
    pub encoder_stepper: [u8; 2],
    pub encoder_base: [u8; 2],
    pub encoder_elbow: [u8; 2],
    pub encoder_claw: [u8; 2],
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            step: 27,
            dir: 17,
            base_servos: [22, 23],
            elbow_servo: 24,
            claw_servo: 25,
            elbow_inverted: true,
            encoder_stepper: [5, 6],
            encoder_base: [12, 13],
            encoder_elbow: [16, 26],
            encoder_claw: [20, 21],
        }
    }
}

/// Physics of the simulated backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Joint rate at speed 100.
    #[serde(default = "default_sim_deg_per_s")]
    pub full_speed_deg_per_s: f64,
    #[serde(default = "default_sim_tick_us")]
    pub tick_us: u64,
    /// Chance per accepted edge of an extra bounce edge right behind it.
    #[serde(default)]
    pub bounce_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            full_speed_deg_per_s: default_sim_deg_per_s(),
            tick_us: default_sim_tick_us(),
            bounce_probability: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
    #[serde(default)]
    pub serial_port: Option<String>,
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,
    #[serde(default)]
    pub console: bool,
    #[serde(default = "default_telemetry_hz")]
    pub telemetry_hz: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_bind: default_http_bind(),
            serial_port: None,
            serial_baud: default_serial_baud(),
            console: false,
            telemetry_hz: default_telemetry_hz(),
        }
    }
}

impl Config {
    /// Reject geometry and tuning the control loop cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        let arm = &self.arm;
        if arm.link1 <= 0.0 || arm.link2 <= 0.0 {
            return Err("Link lengths must be > 0".to_string());
        }
        if arm.safety_margin < 0.0 {
            return Err("Safety margin must be >= 0".to_string());
        }
        if arm.safety_margin >= arm.link1 + arm.link2 {
            return Err(format!(
                "Safety margin {} leaves no reach for links {} + {}",
                arm.safety_margin, arm.link1, arm.link2
            ));
        }
        if arm.joint_min_deg > arm.joint_max_deg {
            return Err("joint_min_deg must not exceed joint_max_deg".to_string());
        }

        let motion = &self.motion;
        if motion.loop_period_ms == 0 {
            return Err("Loop period must be > 0".to_string());
        }
        if motion.tolerance_deg < 0 || motion.slow_zone_deg <= motion.tolerance_deg {
            return Err("Slow zone must be wider than the tolerance band".to_string());
        }
        if motion.slow_speed <= 0 || motion.slow_speed > motion.full_speed || motion.full_speed > 100 {
            return Err("Speeds must satisfy 0 < slow_speed <= full_speed <= 100".to_string());
        }
        if motion.preempt_settle_ms == 0 {
            return Err("Preempt settle must be > 0".to_string());
        }
        if motion.convergence_timeout_ms == 0 {
            return Err("Convergence timeout must be > 0".to_string());
        }
        if self.encoder.debounce_us == 0 {
            return Err("Encoder debounce must be > 0".to_string());
        }
        // A pulse in flight must finish before the next move re-arms.
        if motion.preempt_settle_ms.saturating_mul(1000) < u64::from(self.encoder.debounce_us) {
            return Err(format!(
                "Preempt settle {} ms is shorter than the encoder debounce {} us",
                motion.preempt_settle_ms, self.encoder.debounce_us
            ));
        }

        if self.vertical.steps_per_mm <= 0 {
            return Err("steps_per_mm must be > 0".to_string());
        }
        if self.vertical.step_half_period_us == 0 {
            return Err("Step half-period must be > 0".to_string());
        }
        if self.transport.telemetry_hz == 0 {
            return Err("Telemetry rate must be > 0".to_string());
        }
        let sim = &self.hardware.simulation;
        if !(0.0..=1.0).contains(&sim.bounce_probability) {
            return Err("Bounce probability must be between 0 and 1".to_string());
        }
        if sim.full_speed_deg_per_s <= 0.0 || sim.tick_us == 0 {
            return Err("Simulation rate and tick must be > 0".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_arm_name() -> String { "arm".to_string() }
fn default_link1() -> f64 { 13.7 }
fn default_link2() -> f64 { 10.0 }
fn default_safety_margin() -> f64 { 1.0 }
fn default_joint_min() -> i32 { 0 }
fn default_joint_max() -> i32 { 180 }
fn default_loop_period_ms() -> u64 { 10 }
fn default_full_speed() -> i32 { 100 }
fn default_slow_speed() -> i32 { 30 }
fn default_slow_zone() -> i32 { 30 }
fn default_tolerance() -> i32 { 5 }
fn default_preempt_settle_ms() -> u64 { 20 }
fn default_convergence_timeout_ms() -> u64 { 30_000 }
fn default_steps_per_mm() -> i32 { 100 }
fn default_step_half_period_us() -> u64 { 500 }
fn default_debounce_us() -> u32 { 1000 }
fn default_home_deg() -> i32 { 90 }
fn default_true() -> bool { true }
fn default_sim_deg_per_s() -> f64 { 180.0 }
fn default_sim_tick_us() -> u64 { 1000 }
fn default_http_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_serial_baud() -> u32 { 115200 }
fn default_telemetry_hz() -> u32 { 20 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate().map_err(ConfigError::Invalid)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.arm.link1, 13.7);
        assert_eq!(config.arm.link2, 10.0);
        assert_eq!(config.arm.safety_margin, 1.0);
        assert_eq!(config.motion.loop_period_ms, 10);
        assert_eq!(config.motion.preempt_settle_ms, 20);
        assert_eq!(config.motion.resume_policy, ResumePolicy::Auto);
        assert_eq!(config.vertical.steps_per_mm, 100);
        assert_eq!(config.vertical.feedback, VerticalFeedback::StepCount);
        assert_eq!(config.encoder.debounce_us, 1000);
        assert_eq!(config.hardware.backend, HardwareBackend::Simulated);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_reference_arm() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.arm.joint_max_deg, 180);
        assert_eq!(config.calibration.home_claw_deg, 90);
        assert_eq!(config.transport.telemetry_hz, 20);
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("arm.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[arm]\nlink1 = 20.0\n\n[motion]\nresume_policy = 'explicit'\n\n[vertical]\nfeedback = 'encoder'"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.arm.link1, 20.0);
        assert_eq!(config.motion.resume_policy, ResumePolicy::Explicit);
        assert_eq!(config.vertical.feedback, VerticalFeedback::Encoder);
        // Defaults for missing fields
        assert_eq!(config.arm.link2, 10.0);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_load_config_rejects_margin_larger_than_reach() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("margin.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[arm]\nsafety_margin = 30.0").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_speed_ordering() {
        let mut config = Config::default();
        config.motion.slow_speed = 120;
        assert!(config.validate().is_err());
        config.motion.slow_speed = 30;
        config.motion.slow_zone_deg = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_preempt_settle() {
        let mut config = Config::default();
        config.motion.preempt_settle_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_convergence_timeout() {
        let mut config = Config::default();
        config.motion.convergence_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_debounce() {
        let mut config = Config::default();
        config.encoder.debounce_us = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_settle_shorter_than_debounce() {
        let mut config = Config::default();
        config.motion.preempt_settle_ms = 2;
        config.encoder.debounce_us = 2500;
        let err = config.validate().unwrap_err();
        assert!(err.contains("shorter than the encoder debounce"));
        config.encoder.debounce_us = 2000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_rejects_zero_debounce() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("debounce.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[encoder]\ndebounce_us = 0").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
