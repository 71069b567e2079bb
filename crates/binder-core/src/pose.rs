//! Joint poses and sampled trajectories.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of joints on a UR arm.
pub const JOINT_COUNT: usize = 6;

/// Tolerance used when checking that frames are evenly spaced (seconds).
pub const SPACING_TOLERANCE: f64 = 1e-9;

/// One angle per joint, ordered base to wrist 3.
pub type JointAngles = [f64; JOINT_COUNT];

/// Arm joints in controller order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
    Wrist1,
    Wrist2,
    Wrist3,
}

impl Joint {
    /// All joints in controller order.
    pub const ALL: [Self; JOINT_COUNT] = [
        Self::Base,
        Self::Shoulder,
        Self::Elbow,
        Self::Wrist1,
        Self::Wrist2,
        Self::Wrist3,
    ];

    /// Position of this joint in a [`JointAngles`] array.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Rig bone name for this joint.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::Shoulder => "Shoulder",
            Self::Elbow => "Elbow",
            Self::Wrist1 => "Wrist1",
            Self::Wrist2 => "Wrist2",
            Self::Wrist3 => "Wrist3",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open animation time range `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    #[must_use]
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Range covering frames `start_frame..end_frame` of a scene running at `fps`.
    #[must_use]
    pub fn from_frames(start_frame: i64, end_frame: i64, fps: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        Self {
            start: start_frame as f64 / fps,
            end: end_frame as f64 / fps,
        }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Raw pose read from the rig at one sample tick, in rig units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigPose {
    /// Sample index counted from the start of the range.
    pub tick: u64,
    /// Animation time the rig was evaluated at.
    pub time: f64,
    pub angles: JointAngles,
}

/// Joint angles for one frame, in radians and the controller's convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FramePose {
    frame_index: u64,
    timestamp: f64,
    angles: JointAngles,
}

impl FramePose {
    /// Build a pose whose timestamp is `frame_index / sample_rate`.
    #[must_use]
    pub fn new(frame_index: u64, sample_rate: f64, angles: JointAngles) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let timestamp = frame_index as f64 / sample_rate;
        Self {
            frame_index,
            timestamp,
            angles,
        }
    }

    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Seconds from trajectory start.
    #[must_use]
    pub const fn timestamp(&self) -> f64 {
        self.timestamp
    }

    #[must_use]
    pub const fn angles(&self) -> &JointAngles {
        &self.angles
    }

    #[must_use]
    pub const fn angle(&self, joint: Joint) -> f64 {
        self.angles[joint.index()]
    }
}

/// Trajectory construction error.
#[derive(Debug, Error, PartialEq)]
pub enum TrajectoryError {
    #[error("Trajectory has no frames")]
    Empty,
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),
    #[error("Frame {index} at {timestamp}s does not follow the previous frame by one interval")]
    UnevenSpacing { index: u64, timestamp: f64 },
}

/// Evenly spaced, strictly increasing sequence of frame poses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    frames: Vec<FramePose>,
    sample_rate: f64,
}

impl Trajectory {
    /// Build a trajectory, checking spacing against `1 / sample_rate`.
    ///
    /// # Errors
    /// Returns error if there are no frames, the rate is not a positive
    /// finite number, or consecutive timestamps are not one interval apart.
    pub fn new(frames: Vec<FramePose>, sample_rate: f64) -> Result<Self, TrajectoryError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(TrajectoryError::InvalidSampleRate(sample_rate));
        }
        if frames.is_empty() {
            return Err(TrajectoryError::Empty);
        }

        let interval = 1.0 / sample_rate;
        for pair in frames.windows(2) {
            let step = pair[1].timestamp - pair[0].timestamp;
            if step <= 0.0 || (step - interval).abs() > SPACING_TOLERANCE {
                return Err(TrajectoryError::UnevenSpacing {
                    index: pair[1].frame_index,
                    timestamp: pair[1].timestamp,
                });
            }
        }

        Ok(Self {
            frames,
            sample_rate,
        })
    }

    #[must_use]
    pub fn frames(&self) -> &[FramePose] {
        &self.frames
    }

    #[must_use]
    pub fn first(&self) -> &FramePose {
        &self.frames[0]
    }

    #[must_use]
    pub fn last(&self) -> &FramePose {
        &self.frames[self.frames.len() - 1]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; kept for the `len`/`is_empty` pairing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Seconds between consecutive frames.
    #[must_use]
    pub fn sample_interval(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Length of one playback cycle, including the step back to frame 0.
    #[must_use]
    pub fn cycle_duration(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let frames = self.frames.len() as f64;
        frames * self.sample_interval()
    }

    /// Seconds between the first frame and frame `position` of this trajectory.
    #[must_use]
    pub fn offset_of(&self, position: usize) -> f64 {
        self.frames[position].timestamp - self.frames[0].timestamp
    }

    /// Raw angle arrays, in frame order.
    #[must_use]
    pub fn angle_rows(&self) -> Vec<JointAngles> {
        self.frames.iter().map(|f| f.angles).collect()
    }
}
