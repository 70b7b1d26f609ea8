// src/motion/kinematics.rs - Two-link planar inverse kinematics
//
// Single elbow branch: the base angle is measured from +X and the elbow angle
// is the turn of link 2 relative to link 1.
//
// Reach checks run in f64 against the envelope. The angle math runs in f32
// with f64 only for pi, matching the firmware's `acosf`/`atan2f` path, so the
// truncated degrees agree with offsets calibrated against it.
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::arm::ArmError;
use crate::hardware::Axis;
use super::safety::SafetyEnvelope;

/// Joint angles produced by [`solve`], both within the joint bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointTarget {
    pub base_deg: i32,
    pub elbow_deg: i32,
}

/// Cartesian target in the arm plane (cm) plus a height in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub x: f64,
    pub y: f64,
    pub z: i32,
}

/// Radians to integer degrees, truncating toward zero. The product is taken
/// in f32 and the division by pi in f64.
pub fn rad_to_deg_truncated(rad: f32) -> i32 {
    (f64::from(rad * 180.0) / PI) as i32
}

fn solve_f32(envelope: &SafetyEnvelope, x: f64, y: f64) -> Result<(f32, f32), ArmError> {
    envelope.check_reach((x * x + y * y).sqrt())?;

    let (x, y) = (x as f32, y as f32);
    let (l1, l2) = (envelope.link1() as f32, envelope.link2() as f32);
    let dist = (x * x + y * y).sqrt();
    let cos_a = ((l1 * l1 + dist * dist - l2 * l2) / (2.0 * l1 * dist)).clamp(-1.0, 1.0);
    let angle_a = cos_a.acos();
    let angle_b = y.atan2(x);
    let theta1 = angle_b - angle_a;

    let cos_c = ((l1 * l1 + l2 * l2 - dist * dist) / (2.0 * l1 * l2)).clamp(-1.0, 1.0);
    let theta2 = (PI - f64::from(cos_c.acos())) as f32;
    Ok((theta1, theta2))
}

/// Joint angles in radians before truncation.
pub fn solve_radians(envelope: &SafetyEnvelope, x: f64, y: f64) -> Result<(f64, f64), ArmError> {
    let (theta1, theta2) = solve_f32(envelope, x, y)?;
    Ok((f64::from(theta1), f64::from(theta2)))
}

/// Solve for integer joint angles and apply the joint bounds.
pub fn solve(envelope: &SafetyEnvelope, x: f64, y: f64) -> Result<JointTarget, ArmError> {
    let (theta1, theta2) = solve_f32(envelope, x, y)?;
    let target = JointTarget {
        base_deg: rad_to_deg_truncated(theta1),
        elbow_deg: rad_to_deg_truncated(theta2),
    };
    envelope.check_joint_angle(Axis::Base, target.base_deg)?;
    envelope.check_joint_angle(Axis::Elbow, target.elbow_deg)?;
    tracing::debug!(
        "IK ({:.3}, {:.3}) -> base {} elbow {}",
        x, y, target.base_deg, target.elbow_deg
    );
    Ok(target)
}

/// End effector position for the given joint angles in radians.
pub fn forward(link1: f64, link2: f64, theta1: f64, theta2: f64) -> (f64, f64) {
    let x = link1 * theta1.cos() + link2 * (theta1 + theta2).cos();
    let y = link1 * theta1.sin() + link2 * (theta1 + theta2).sin();
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArmConfig;

    fn envelope() -> SafetyEnvelope {
        SafetyEnvelope::new(&ArmConfig::default())
    }

    #[test]
    fn test_truncation_toward_zero() {
        assert_eq!(rad_to_deg_truncated(0.999_f32.to_radians()), 0);
        assert_eq!(rad_to_deg_truncated(45.9_f32.to_radians()), 45);
        assert_eq!(rad_to_deg_truncated(-19.47_f32.to_radians()), -19);
    }

    #[test]
    fn test_single_precision_truncation_at_degree_boundary() {
        // atan2f(y, 0) rounds pi/2 up, so straight up lands on 90 rather than 89.
        let target = solve(&envelope(), 0.0, 23.7).unwrap();
        assert_eq!(target, JointTarget { base_deg: 90, elbow_deg: 0 });
    }

    #[test]
    fn test_solve_in_envelope() {
        let target = solve(&envelope(), 5.0, 15.0).unwrap();
        assert_eq!(target, JointTarget { base_deg: 32, elbow_deg: 97 });
    }

    #[test]
    fn test_straight_out_at_full_reach() {
        let (t1, t2) = solve_radians(&envelope(), 23.7, 0.0).unwrap();
        assert!(t1.abs() < 1e-6);
        assert!(t2.abs() < 1e-6);
    }

    #[test]
    fn test_negative_base_is_joint_limit() {
        let err = solve(&envelope(), 10.0, 5.0).unwrap_err();
        assert!(matches!(err, ArmError::JointLimitExceeded { axis: Axis::Base, angle: -19, .. }));
    }

    #[test]
    fn test_origin_is_unreachable() {
        assert!(matches!(solve(&envelope(), 0.0, 0.0), Err(ArmError::Unreachable { .. })));
    }

    #[test]
    fn test_nan_is_unreachable() {
        assert!(matches!(solve(&envelope(), f64::NAN, 1.0), Err(ArmError::Unreachable { .. })));
    }
}
