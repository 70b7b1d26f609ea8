// src/motion/safety.rs - Reach and joint bound checks
use crate::arm::ArmError;
use crate::config::ArmConfig;
use crate::hardware::Axis;

/// Geometric and angular limits of the arm.
///
/// Immutable after construction except for `effective_max_reach`, which
/// starts at `L1 + L2` and shrinks to `L1 + L2 - margin` once calibrated.
#[derive(Debug, Clone)]
pub struct SafetyEnvelope {
    link1: f64,
    link2: f64,
    margin: f64,
    effective_max_reach: f64,
    joint_min_deg: i32,
    joint_max_deg: i32,
    calibrated: bool,
}

impl SafetyEnvelope {
    pub fn new(arm: &ArmConfig) -> Self {
        Self {
            link1: arm.link1,
            link2: arm.link2,
            margin: arm.safety_margin,
            effective_max_reach: arm.link1 + arm.link2,
            joint_min_deg: arm.joint_min_deg,
            joint_max_deg: arm.joint_max_deg,
            calibrated: false,
        }
    }

    pub fn link1(&self) -> f64 {
        self.link1
    }

    pub fn link2(&self) -> f64 {
        self.link2
    }

    pub fn effective_max_reach(&self) -> f64 {
        self.effective_max_reach
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Safety margin first, then triangle feasibility.
    pub fn check_reach(&self, dist: f64) -> Result<(), ArmError> {
        if !dist.is_finite() {
            return Err(ArmError::Unreachable { distance: dist });
        }
        if dist > self.effective_max_reach {
            return Err(ArmError::ExceedsSafeReach {
                distance: dist,
                limit: self.effective_max_reach,
            });
        }
        let inner = (self.link1 - self.link2).abs();
        if dist > self.link1 + self.link2 || dist < inner || dist <= 0.0 {
            return Err(ArmError::Unreachable { distance: dist });
        }
        Ok(())
    }

    pub fn check_joint_angle(&self, axis: Axis, deg: i32) -> Result<(), ArmError> {
        if deg < self.joint_min_deg || deg > self.joint_max_deg {
            return Err(ArmError::JointLimitExceeded {
                axis,
                angle: deg,
                min: self.joint_min_deg,
                max: self.joint_max_deg,
            });
        }
        Ok(())
    }

    /// Shrink the reach by the safety margin. Repeated calls are no-ops.
    pub fn apply_calibration(&mut self) -> f64 {
        self.effective_max_reach = self.link1 + self.link2 - self.margin;
        if !self.calibrated {
            tracing::info!("Effective reach limited to {:.2}", self.effective_max_reach);
        }
        self.calibrated = true;
        self.effective_max_reach
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reach_before_and_after_calibration() {
        let mut envelope = SafetyEnvelope::new(&ArmConfig::default());
        assert_eq!(envelope.effective_max_reach(), 23.7);
        assert!(envelope.check_reach(23.0).is_ok());

        assert_eq!(envelope.apply_calibration(), 22.7);
        assert_eq!(envelope.apply_calibration(), 22.7);
        assert!(matches!(
            envelope.check_reach(23.0),
            Err(ArmError::ExceedsSafeReach { .. })
        ));
    }

    #[test]
    fn test_safe_reach_reported_before_geometry() {
        let envelope = SafetyEnvelope::new(&ArmConfig::default());
        // Past both limits: the margin violation wins.
        assert!(matches!(
            envelope.check_reach(40.0),
            Err(ArmError::ExceedsSafeReach { .. })
        ));
    }

    #[test]
    fn test_inner_dead_zone() {
        let envelope = SafetyEnvelope::new(&ArmConfig::default());
        assert!(matches!(envelope.check_reach(2.0), Err(ArmError::Unreachable { .. })));
        assert!(envelope.check_reach(3.7).is_ok());
    }

    #[test]
    fn test_joint_bounds_inclusive() {
        let envelope = SafetyEnvelope::new(&ArmConfig::default());
        assert!(envelope.check_joint_angle(Axis::Base, 0).is_ok());
        assert!(envelope.check_joint_angle(Axis::Elbow, 180).is_ok());
        assert!(envelope.check_joint_angle(Axis::Claw, 181).is_err());
        assert!(envelope.check_joint_angle(Axis::Base, -1).is_err());
    }
}
