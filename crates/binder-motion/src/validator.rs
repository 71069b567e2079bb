//! Velocity, acceleration and range checks over a sampled trajectory.
//!
//! Interior breaches reject the trajectory outright. Breaches that only
//! involve the loop seam (last frame back to first) downgrade it to a
//! warning the operator must acknowledge.

use binder_core::{
    Classification, FramePose, Joint, JointAngles, JointLimits, LimitKind, Trajectory, Transition,
    ValidationReport, Violation,
};

/// One step between two frames, with its per-joint angle change and velocity.
struct Step {
    from_frame: u64,
    to_frame: u64,
    transition: Transition,
    delta: JointAngles,
    velocity: JointAngles,
}

impl Step {
    fn new(from: &FramePose, to: &FramePose, transition: Transition, dt: f64) -> Self {
        let delta: JointAngles = std::array::from_fn(|j| to.angles()[j] - from.angles()[j]);
        Self {
            from_frame: from.frame_index(),
            to_frame: to.frame_index(),
            transition,
            delta,
            velocity: delta.map(|d| d / dt),
        }
    }
}

/// Validate `trajectory` against `limits`.
///
/// With `looped` set, the step from the last frame back to the first is
/// checked as a loop seam transition. Deterministic: the same inputs always
/// produce the same report.
#[must_use]
pub fn validate(trajectory: &Trajectory, limits: &JointLimits, looped: bool) -> ValidationReport {
    let frames = trajectory.frames();
    let dt = trajectory.sample_interval();
    let mut violations = Vec::new();

    for frame in frames {
        for joint in Joint::ALL {
            let limit = limits.joint(joint);
            let angle = frame.angle(joint);
            let bound = if angle < limit.min_angle {
                Some(limit.min_angle)
            } else if angle > limit.max_angle {
                Some(limit.max_angle)
            } else {
                None
            };
            if let Some(bound) = bound {
                violations.push(Violation {
                    kind: LimitKind::Position,
                    transition: Transition::Interior,
                    from_frame: frame.frame_index(),
                    to_frame: frame.frame_index(),
                    joint,
                    measured: angle,
                    delta: angle - bound,
                    limit: bound,
                });
            }
        }
    }

    let mut steps: Vec<Step> = frames
        .windows(2)
        .map(|pair| Step::new(&pair[0], &pair[1], Transition::Interior, dt))
        .collect();

    if looped {
        let (last, first) = (trajectory.last(), trajectory.first());
        steps.push(Step::new(last, first, Transition::LoopSeam, dt));
    }

    for step in &steps {
        for joint in Joint::ALL {
            let measured = step.velocity[joint.index()];
            let limit = limits.joint(joint).max_velocity;
            if measured.abs() > limit {
                violations.push(Violation {
                    kind: LimitKind::Velocity,
                    transition: step.transition,
                    from_frame: step.from_frame,
                    to_frame: step.to_frame,
                    joint,
                    measured,
                    delta: step.delta[joint.index()],
                    limit,
                });
            }
        }
    }

    // Acceleration between consecutive steps, reported on the later step.
    // With a loop the sequence is cyclic, so the seam step has a neighbour
    // on both sides.
    let pairs = if looped { steps.len() } else { steps.len().saturating_sub(1) };
    for i in 0..pairs {
        let (prev, next) = (&steps[i], &steps[(i + 1) % steps.len()]);
        let transition = if prev.transition == Transition::LoopSeam || next.transition == Transition::LoopSeam {
            Transition::LoopSeam
        } else {
            Transition::Interior
        };
        for joint in Joint::ALL {
            let j = joint.index();
            let change = next.velocity[j] - prev.velocity[j];
            let measured = change / dt;
            let limit = limits.joint(joint).max_acceleration;
            if measured.abs() > limit {
                violations.push(Violation {
                    kind: LimitKind::Acceleration,
                    transition,
                    from_frame: next.from_frame,
                    to_frame: next.to_frame,
                    joint,
                    measured,
                    delta: change,
                    limit,
                });
            }
        }
    }

    let classification = classify(&violations);
    tracing::debug!(
        frames = frames.len(),
        looped,
        violations = violations.len(),
        %classification,
        "Validated trajectory"
    );

    ValidationReport {
        classification,
        violations,
        loop_checked: looped,
    }
}

/// Interior breaches dominate seam breaches.
fn classify(violations: &[Violation]) -> Classification {
    if violations.iter().any(|v| v.transition == Transition::Interior) {
        Classification::Rejected
    } else if violations.is_empty() {
        Classification::Ok
    } else {
        Classification::WarnLoopDiscontinuity
    }
}

#[cfg(test)]
mod tests {
    use binder_core::{JOINT_COUNT, JointLimit};

    use super::*;

    /// Velocity limit 1 rad/s, generous acceleration and range.
    fn scenario_limits() -> JointLimits {
        JointLimits::uniform(JointLimit::new(-10.0, 10.0, 1.0, 1000.0))
    }

    /// Interval 0.1 s, every joint at `values[i]` on frame `i`.
    fn trajectory(values: &[f64]) -> Trajectory {
        let frames = values
            .iter()
            .enumerate()
            .map(|(i, &v)| FramePose::new(i as u64, 10.0, [v; JOINT_COUNT]))
            .collect();
        Trajectory::new(frames, 10.0).unwrap()
    }

    #[test]
    fn test_scenario_a_within_limits() {
        let report = validate(&trajectory(&[0.0, 0.05]), &scenario_limits(), false);
        assert_eq!(report.classification, Classification::Ok);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_scenario_b_interior_spike_rejected() {
        let report = validate(&trajectory(&[0.0, 0.2]), &scenario_limits(), false);
        assert_eq!(report.classification, Classification::Rejected);
        assert_eq!(report.violations.len(), JOINT_COUNT);
        let v = report.violations[0];
        assert_eq!(v.kind, LimitKind::Velocity);
        assert_eq!((v.from_frame, v.to_frame), (0, 1));
        assert!((v.measured - 2.0).abs() < 1e-9);
        assert!((v.delta - 0.2).abs() < 1e-9);
        assert_eq!(v.limit, 1.0);
    }

    #[test]
    fn test_violation_carries_raw_delta() {
        // Seam step 0.2 -> 0.0 over 0.1 s.
        let report = validate(&trajectory(&[0.0, 0.05, 0.1, 0.15, 0.2]), &scenario_limits(), true);
        let seam = report.seam().find(|v| v.kind == LimitKind::Velocity).unwrap();
        assert!((seam.delta + 0.2).abs() < 1e-9);
        assert!((seam.measured + 2.0).abs() < 1e-9);
        assert!(seam.to_string().contains("delta -0.2000"));

        let limits = JointLimits::uniform(JointLimit::new(-0.1, 0.1, 10.0, 1000.0));
        let report = validate(&trajectory(&[0.0, 0.15]), &limits, false);
        let position = report.violations.iter().find(|v| v.kind == LimitKind::Position).unwrap();
        assert!((position.delta - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_scenario_c_seam_only_warns() {
        let report = validate(
            &trajectory(&[0.0, 0.05, 0.1, 0.15, 0.2]),
            &scenario_limits(),
            true,
        );
        assert_eq!(report.classification, Classification::WarnLoopDiscontinuity);
        assert!(report.interior().next().is_none());
        let seam: Vec<_> = report.seam().filter(|v| v.kind == LimitKind::Velocity).collect();
        assert_eq!(seam.len(), JOINT_COUNT);
        assert_eq!((seam[0].from_frame, seam[0].to_frame), (4, 0));
        assert!((seam[0].measured + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_seam_ignored_without_loop() {
        let report = validate(
            &trajectory(&[0.0, 0.05, 0.1, 0.15, 0.2]),
            &scenario_limits(),
            false,
        );
        assert_eq!(report.classification, Classification::Ok);
        assert!(!report.loop_checked);
    }

    #[test]
    fn test_interior_dominates_seam() {
        let report = validate(&trajectory(&[0.0, 0.05, 0.5, 0.55]), &scenario_limits(), true);
        assert_eq!(report.classification, Classification::Rejected);
        assert!(report.seam().next().is_some());
        assert!(report.interior().next().is_some());
    }

    #[test]
    fn test_interior_rejected_with_smooth_seam() {
        let report = validate(&trajectory(&[0.0, 0.3, 0.0]), &scenario_limits(), true);
        assert_eq!(report.classification, Classification::Rejected);
    }

    #[test]
    fn test_limit_is_inclusive() {
        let limits = JointLimits::uniform(JointLimit::new(-10.0, 10.0, 0.5, 1000.0));
        let report = validate(&trajectory(&[0.0, 0.05]), &limits, false);
        assert_eq!(report.classification, Classification::Ok);
    }

    #[test]
    fn test_interior_acceleration_rejected() {
        // Velocity 0 then 0.9 rad/s: within the velocity limit, 9 rad/s² of acceleration.
        let limits = JointLimits::uniform(JointLimit::new(-10.0, 10.0, 1.0, 5.0));
        let report = validate(&trajectory(&[0.0, 0.0, 0.09]), &limits, false);
        assert_eq!(report.classification, Classification::Rejected);
        assert!(report.violations.iter().all(|v| v.kind == LimitKind::Acceleration));
        assert_eq!(report.violations[0].to_frame, 2);
        assert!((report.violations[0].measured - 9.0).abs() < 1e-9);
        assert!((report.violations[0].delta - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_seam_acceleration_warns() {
        // Seam velocity stays under the limit, but reverses direction abruptly.
        let limits = JointLimits::uniform(JointLimit::new(-10.0, 10.0, 1.0, 5.0));
        let report = validate(&trajectory(&[0.0, 0.09]), &limits, true);
        assert_eq!(report.classification, Classification::WarnLoopDiscontinuity);
        assert!(report.violations.iter().all(|v| v.kind == LimitKind::Acceleration));
    }

    #[test]
    fn test_position_out_of_range_rejected() {
        let limits = JointLimits::uniform(JointLimit::new(-0.1, 0.1, 10.0, 1000.0));
        let report = validate(&trajectory(&[0.0, 0.15]), &limits, false);
        assert_eq!(report.classification, Classification::Rejected);
        let v = report.violations.iter().find(|v| v.kind == LimitKind::Position).unwrap();
        assert_eq!((v.from_frame, v.to_frame), (1, 1));
        assert_eq!(v.limit, 0.1);
    }

    #[test]
    fn test_single_frame_loop_is_ok() {
        let report = validate(&trajectory(&[0.3]), &scenario_limits(), true);
        assert_eq!(report.classification, Classification::Ok);
    }

    #[test]
    fn test_idempotent() {
        let trajectory = trajectory(&[0.0, 0.05, 0.1, 0.4, 0.2]);
        let a = validate(&trajectory, &scenario_limits(), true);
        let b = validate(&trajectory, &scenario_limits(), true);
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_joint_violation_names_joint() {
        let mut b = [0.0; JOINT_COUNT];
        b[Joint::Wrist2.index()] = 0.5;
        let frames = vec![
            FramePose::new(0, 10.0, [0.0; JOINT_COUNT]),
            FramePose::new(1, 10.0, b),
        ];
        let trajectory = Trajectory::new(frames, 10.0).unwrap();
        let report = validate(&trajectory, &scenario_limits(), false);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].joint, Joint::Wrist2);
    }
}
