// Integration tests for inverse kinematics and the safety envelope

#[cfg(test)]
mod tests {
    use arm_rs::config::ArmConfig;
    use arm_rs::hardware::Axis;
    use arm_rs::motion::{forward, solve, solve_radians, JointTarget, SafetyEnvelope};
    use arm_rs::ArmError;

    const EPS: f64 = 1e-6;

    fn envelope() -> SafetyEnvelope {
        SafetyEnvelope::new(&ArmConfig::default())
    }

    #[test]
    fn test_forward_recovers_every_reachable_target() {
        let envelope = envelope();
        let mut checked = 0;
        for xi in -24..=24 {
            for yi in -24..=24 {
                let (x, y) = (xi as f64, yi as f64 + 0.25);
                let Ok((t1, t2)) = solve_radians(&envelope, x, y) else {
                    continue;
                };
                let (fx, fy) = forward(envelope.link1(), envelope.link2(), t1, t2);
                assert!((fx - x).abs() < 1e-3, "x: {} vs {} at ({}, {})", fx, x, x, y);
                assert!((fy - y).abs() < 1e-3, "y: {} vs {} at ({}, {})", fy, y, x, y);
                checked += 1;
            }
        }
        assert!(checked > 500, "only {} reachable grid points", checked);
    }

    #[test]
    fn test_solution_is_within_joint_bounds_or_rejected() {
        let envelope = envelope();
        for xi in -24..=24 {
            for yi in 0..=24 {
                match solve(&envelope, xi as f64, yi as f64) {
                    Ok(target) => {
                        assert!((0..=180).contains(&target.base_deg));
                        assert!((0..=180).contains(&target.elbow_deg));
                    }
                    Err(ArmError::JointLimitExceeded { angle, min, max, .. }) => {
                        assert!(angle < min || angle > max);
                    }
                    Err(ArmError::Unreachable { .. }) | Err(ArmError::ExceedsSafeReach { .. }) => {}
                    Err(other) => panic!("unexpected error {:?}", other),
                }
            }
        }
    }

    #[test]
    fn test_reach_boundaries() {
        let mut envelope = envelope();
        assert!(solve_radians(&envelope, 23.7 - EPS, 0.0).is_ok());
        assert!(matches!(
            solve_radians(&envelope, 23.7 + EPS, 0.0),
            Err(ArmError::ExceedsSafeReach { .. })
        ));
        assert!(solve_radians(&envelope, 3.7 + EPS, 0.0).is_ok());
        assert!(matches!(
            solve_radians(&envelope, 3.7 - EPS, 0.0),
            Err(ArmError::Unreachable { .. })
        ));

        assert_eq!(envelope.apply_calibration(), 22.7);
        assert!(matches!(
            solve_radians(&envelope, 0.0, 22.7 + EPS),
            Err(ArmError::ExceedsSafeReach { limit, .. }) if limit == 22.7
        ));
        assert!(solve_radians(&envelope, 0.0, 22.7 - EPS).is_ok());
    }

    #[test]
    fn test_reference_targets() {
        let envelope = envelope();
        assert_eq!(solve(&envelope, 5.0, 15.0).unwrap(), JointTarget { base_deg: 32, elbow_deg: 97 });
        assert_eq!(solve(&envelope, -5.0, 15.0).unwrap(), JointTarget { base_deg: 69, elbow_deg: 97 });

        let err = solve(&envelope, 10.0, 5.0).unwrap_err();
        assert!(matches!(
            err,
            ArmError::JointLimitExceeded { axis: Axis::Base, angle: -19, min: 0, max: 180 }
        ));
    }

    #[test]
    fn test_points_below_the_base_fail_the_base_bound() {
        let err = solve(&envelope(), 0.0, -15.0).unwrap_err();
        assert!(matches!(err, ArmError::JointLimitExceeded { axis: Axis::Base, .. }));
    }
}
