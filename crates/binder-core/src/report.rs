//! Trajectory validation results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pose::Joint;

/// Overall safety verdict for a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Every transition is within limits.
    Ok,
    /// Only the loop seam breaks a limit. Needs operator acknowledgement.
    WarnLoopDiscontinuity,
    /// An interior transition breaks a limit. Never streamed.
    Rejected,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::WarnLoopDiscontinuity => "warn-loop-discontinuity",
            Self::Rejected => "rejected",
        })
    }
}

/// Which limit was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Position,
    Velocity,
    Acceleration,
}

/// Where in the trajectory a violation sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Interior,
    /// Involves the step from the last frame back to the first.
    LoopSeam,
}

/// One limit breach.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: LimitKind,
    pub transition: Transition,
    /// Frame the offending step starts at.
    pub from_frame: u64,
    /// Frame the offending step ends at; equals `from_frame` for position breaches.
    pub to_frame: u64,
    pub joint: Joint,
    /// Measured value (rad, rad/s or rad/s²), signed.
    pub measured: f64,
    /// Raw change behind `measured`, signed: the angle change across the
    /// step for velocity (rad), the velocity change between the two steps
    /// for acceleration (rad/s), the overshoot past the bound for position
    /// (rad).
    pub delta: f64,
    /// Limit it was compared against.
    pub limit: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} on {} between frames {} and {}: {:.4} (delta {:.4}, limit {:.4})",
            self.transition,
            self.kind,
            self.joint,
            self.from_frame,
            self.to_frame,
            self.measured,
            self.delta,
            self.limit
        )
    }
}

/// Classification plus every breach that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub classification: Classification,
    pub violations: Vec<Violation>,
    /// Whether the loop seam was part of the check.
    pub loop_checked: bool,
}

impl ValidationReport {
    /// Violations on interior transitions.
    pub fn interior(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.transition == Transition::Interior)
    }

    /// Violations involving the loop seam.
    pub fn seam(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.transition == Transition::LoopSeam)
    }

    /// Largest breach relative to its limit, if any.
    #[must_use]
    pub fn worst(&self) -> Option<&Violation> {
        self.violations.iter().max_by(|a, b| {
            let ra = a.measured.abs() / a.limit.abs().max(f64::EPSILON);
            let rb = b.measured.abs() / b.limit.abs().max(f64::EPSILON);
            ra.total_cmp(&rb)
        })
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} violations)", self.classification, self.violations.len())?;
        if let Some(worst) = self.worst() {
            write!(f, ", worst: {worst}")?;
        }
        Ok(())
    }
}
