//! Parameters for one export run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{pose::TimeRange, robot::RobotConfig};

/// Export run identifier.
pub type ExportId = Uuid;

/// Parameters supplied by whatever triggers an export (CLI, GUI, socket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportParams {
    /// Animation time span to sample.
    pub range: TimeRange,

    /// Samples per second. Must divide the controller rate.
    pub sample_rate: f64,

    /// Replay from frame 0 after the last frame until stopped.
    #[serde(default, rename = "loop")]
    pub looped: bool,

    /// Operator accepted that the loop seam may move the arm rapidly.
    #[serde(default)]
    pub acknowledge_loop_warning: bool,

    #[serde(default)]
    pub robot: RobotConfig,
}

impl ExportParams {
    /// One-shot export with default robot settings.
    #[must_use]
    pub fn new(range: TimeRange, sample_rate: f64) -> Self {
        Self {
            range,
            sample_rate,
            looped: false,
            acknowledge_loop_warning: false,
            robot: RobotConfig::default(),
        }
    }

    #[must_use]
    pub fn with_robot(mut self, robot: RobotConfig) -> Self {
        self.robot = robot;
        self
    }

    #[must_use]
    pub const fn with_loop(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    /// Pre-acknowledge a loop seam warning.
    #[must_use]
    pub const fn acknowledged(mut self) -> Self {
        self.acknowledge_loop_warning = true;
        self
    }
}
