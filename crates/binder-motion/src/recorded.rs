//! Pose source backed by a table of pre-solved rig frames.
//!
//! The table is the JSON array of six-angle rows the rig exporter writes,
//! one row per animation frame: `[[b, s, e, w1, w2, w3], ...]`.

use std::path::Path;

use binder_core::{JointAngles, PoseSource};
use thiserror::Error;

/// Recorded pose loading error.
#[derive(Debug, Error)]
pub enum RecordedPosesError {
    #[error("Recording has no frames")]
    Empty,
    #[error("Invalid frame rate: {0}")]
    InvalidFps(f64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid recording: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rig frames captured at a fixed frame rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPoses {
    frames: Vec<JointAngles>,
    fps: f64,
}

impl RecordedPoses {
    /// # Errors
    /// Returns error if there are no frames or `fps` is not positive.
    pub fn new(frames: Vec<JointAngles>, fps: f64) -> Result<Self, RecordedPosesError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(RecordedPosesError::InvalidFps(fps));
        }
        if frames.is_empty() {
            return Err(RecordedPosesError::Empty);
        }
        Ok(Self { frames, fps })
    }

    /// Parse a JSON array of six-angle rows.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or holds no frames.
    pub fn from_json(json: &str, fps: f64) -> Result<Self, RecordedPosesError> {
        Self::new(serde_json::from_str(json)?, fps)
    }

    /// Read a recording file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path, fps: f64) -> Result<Self, RecordedPosesError> {
        Self::from_json(&std::fs::read_to_string(path)?, fps)
    }

    #[must_use]
    pub fn frames(&self) -> &[JointAngles] {
        &self.frames
    }

    #[must_use]
    pub const fn fps(&self) -> f64 {
        self.fps
    }

    /// Seconds covered by the recording, one frame period per row.
    #[must_use]
    pub fn duration(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let count = self.frames.len() as f64;
        count / self.fps
    }
}

impl PoseSource for RecordedPoses {
    /// Frame nearest to `time`, clamped to the recording.
    fn joint_angles(&self, time: f64) -> JointAngles {
        let position = (time * self.fps).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = if position.is_nan() || position <= 0.0 {
            0
        } else {
            (position as usize).min(self.frames.len() - 1)
        };
        self.frames[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let poses = RecordedPoses::from_json(
            "[[0,0,0,0,0,0],[0.1,0.2,0.3,0.4,0.5,0.6]]",
            25.0,
        )
        .unwrap();
        assert_eq!(poses.frames().len(), 2);
        assert!((poses.duration() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_lookup_nearest_and_clamped() {
        let rows = (0..5_i32).map(|i| [f64::from(i); 6]).collect();
        let poses = RecordedPoses::new(rows, 10.0).unwrap();
        assert_eq!(poses.joint_angles(0.0)[0], 0.0);
        assert_eq!(poses.joint_angles(0.2)[0], 2.0);
        assert_eq!(poses.joint_angles(0.249)[0], 2.0);
        assert_eq!(poses.joint_angles(-1.0)[0], 0.0);
        assert_eq!(poses.joint_angles(9.0)[0], 4.0);
    }

    #[test]
    fn test_wrong_arity_rejected() {
        let err = RecordedPoses::from_json("[[0,0,0]]", 25.0).unwrap_err();
        assert!(matches!(err, RecordedPosesError::Json(_)));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(
            RecordedPoses::from_json("[]", 25.0),
            Err(RecordedPosesError::Empty)
        ));
        assert!(matches!(
            RecordedPoses::new(vec![[0.0; 6]], 0.0),
            Err(RecordedPosesError::InvalidFps(_))
        ));
    }
}
