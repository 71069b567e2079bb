//! Rig angles to controller joint space.

use std::f64::consts::TAU;

use binder_core::{
    AngleUnit, FramePose, JOINT_COUNT, Joint, JointAngles, JointCorrections, RigPose,
};
use thiserror::Error;

/// Slack on the ±2π bound, absorbs rounding in the offset arithmetic.
const RANGE_EPSILON: f64 = 1e-9;

/// Mapping error. Any occurrence aborts the export.
#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("Tick {tick}: {joint} angle is not finite ({value})")]
    NonFinite { tick: u64, joint: Joint, value: f64 },
    #[error("Tick {tick}: {joint} maps to {radians} rad, outside ±2π")]
    OutOfRange { tick: u64, joint: Joint, radians: f64 },
}

/// Applies per-joint sign, zero offset and unit conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointMapper {
    corrections: JointCorrections,
    sample_rate: f64,
}

impl JointMapper {
    #[must_use]
    pub const fn new(corrections: JointCorrections, sample_rate: f64) -> Self {
        Self {
            corrections,
            sample_rate,
        }
    }

    /// Map one rig pose.
    ///
    /// # Errors
    /// Returns error if an input angle is NaN or infinite, or if a mapped
    /// angle falls outside ±2π.
    pub fn map(&self, pose: &RigPose) -> Result<FramePose, MappingError> {
        let mut angles = [0.0; JOINT_COUNT];
        for joint in Joint::ALL {
            let value = pose.angles[joint.index()];
            if !value.is_finite() {
                return Err(MappingError::NonFinite {
                    tick: pose.tick,
                    joint,
                    value,
                });
            }

            let axis = self.corrections.axis(joint);
            let radians = axis.sign * to_radians(value, self.corrections.unit) + axis.offset;
            if !radians.is_finite() || radians.abs() > TAU + RANGE_EPSILON {
                return Err(MappingError::OutOfRange {
                    tick: pose.tick,
                    joint,
                    radians,
                });
            }
            angles[joint.index()] = radians;
        }
        Ok(FramePose::new(pose.tick, self.sample_rate, angles))
    }

    /// Recover rig angles from a mapped pose.
    #[must_use]
    pub fn unmap(&self, pose: &FramePose) -> JointAngles {
        let mut rig = [0.0; JOINT_COUNT];
        for joint in Joint::ALL {
            let axis = self.corrections.axis(joint);
            let radians = (pose.angle(joint) - axis.offset) / axis.sign;
            rig[joint.index()] = from_radians(radians, self.corrections.unit);
        }
        rig
    }
}

fn to_radians(value: f64, unit: AngleUnit) -> f64 {
    match unit {
        AngleUnit::Radians => value,
        AngleUnit::Degrees => value.to_radians(),
    }
}

fn from_radians(value: f64, unit: AngleUnit) -> f64 {
    match unit {
        AngleUnit::Radians => value,
        AngleUnit::Degrees => value.to_degrees(),
    }
}
