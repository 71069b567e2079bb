//! Wire protocol for driver-server communication.

use binder_core::{
    ExportEvent, ExportId, ExportParams, ExportState, JointAngles, RobotConfig, Termination,
    TimeRange, ValidationReport,
};
use binder_motion::{RecordedPoses, RecordedPosesError};
use binder_session::{ExportError, ExportOutcome};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Export request carried by [`ClientMessage::StartExport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Rig angles, one six-angle row per recorded frame.
    pub poses: Vec<JointAngles>,
    /// Frame rate the rows were recorded at.
    pub fps: f64,
    /// Samples per second sent to the robot. Defaults to `fps`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    /// Time span to export. Defaults to the whole recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<TimeRange>,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default)]
    pub acknowledge_loop_warning: bool,
    /// Overrides the configured controller address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Malformed export request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid poses: {0}")]
    Poses(#[from] RecordedPosesError),
}

impl ExportRequest {
    /// Turn the request into a pose source and export parameters on top of
    /// the server's robot configuration.
    ///
    /// # Errors
    /// Returns error if the pose table is empty or its frame rate invalid.
    pub fn into_export(
        self,
        robot: &RobotConfig,
    ) -> Result<(RecordedPoses, ExportParams), RequestError> {
        let recording = RecordedPoses::new(self.poses, self.fps)?;
        let range = self
            .range
            .unwrap_or_else(|| TimeRange::new(0.0, recording.duration()));

        let mut robot = robot.clone();
        if let Some(host) = self.host {
            robot.host = Some(host);
        }

        let mut params = ExportParams::new(range, self.sample_rate.unwrap_or(self.fps))
            .with_robot(robot)
            .with_loop(self.looped);
        params.acknowledge_loop_warning = self.acknowledge_loop_warning;
        Ok((recording, params))
    }
}

/// Message from driver to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sample, validate and stream a recording.
    StartExport(ExportRequest),
    /// Graceful stop of the running export.
    Stop,
    /// Abort the running export.
    Cancel,
    /// Ask for the controller state.
    Status,
    /// Ping for keepalive.
    Ping,
}

/// Message from server to driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Progress of the running export.
    Event { event: ExportEvent },
    /// An export ended without error.
    ExportFinished {
        export_id: ExportId,
        termination: Option<Termination>,
        frames: usize,
        frames_sent: u64,
        frames_skipped: u64,
        cycles_completed: u64,
    },
    /// A request failed. Validation failures carry the report.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<ValidationReport>,
    },
    Status {
        state: ExportState,
        export_id: Option<ExportId>,
        frame_index: Option<u64>,
    },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            report: None,
        }
    }

    #[must_use]
    pub fn finished(outcome: &ExportOutcome) -> Self {
        Self::ExportFinished {
            export_id: outcome.export_id,
            termination: outcome.summary.termination,
            frames: outcome.frames,
            frames_sent: outcome.summary.frames_sent,
            frames_skipped: outcome.summary.frames_skipped,
            cycles_completed: outcome.summary.cycles_completed,
        }
    }

    #[must_use]
    pub fn export_failed(err: &ExportError) -> Self {
        let report = match err {
            ExportError::ValidationRejected(report) | ExportError::ValidationWarning(report) => {
                Some(report.clone())
            }
            _ => None,
        };
        Self::Error {
            message: err.to_string(),
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use binder_core::Classification;
    use tokio_test::assert_ok;

    use super::*;

    #[test]
    fn test_start_export_defaults() {
        let json = r#"{"type":"start_export","poses":[[0,0,0,0,0,0],[0,0,0,0,0,0]],"fps":25}"#;
        let msg: ClientMessage = assert_ok!(serde_json::from_str(json));
        let ClientMessage::StartExport(request) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(request.poses.len(), 2);
        assert!(!request.looped);
        assert!(request.sample_rate.is_none());

        let (recording, params) = assert_ok!(request.into_export(&RobotConfig::default()));
        assert_eq!(recording.frames().len(), 2);
        assert_eq!(params.range, TimeRange::new(0.0, 0.08));
        assert!((params.sample_rate - 25.0).abs() < f64::EPSILON);
        assert!(params.robot.host.is_none());
    }

    #[test]
    fn test_start_export_overrides() {
        let json = r#"{
            "type": "start_export",
            "poses": [[0,0,0,0,0,0]],
            "fps": 50,
            "sample_rate": 25,
            "range": {"start": 0.5, "end": 1.5},
            "loop": true,
            "acknowledge_loop_warning": true,
            "host": "10.0.0.5"
        }"#;
        let ClientMessage::StartExport(request) = serde_json::from_str(json).unwrap() else {
            panic!("Wrong message type");
        };
        let (_, params) = assert_ok!(request.into_export(&RobotConfig::default()));
        assert!(params.looped);
        assert!(params.acknowledge_loop_warning);
        assert_eq!(params.range, TimeRange::new(0.5, 1.5));
        assert_eq!(params.robot.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(params.robot.script_port, 30002);
    }

    #[test]
    fn test_empty_poses_rejected() {
        let request = ExportRequest {
            poses: Vec::new(),
            fps: 25.0,
            sample_rate: None,
            range: None,
            looped: false,
            acknowledge_loop_warning: false,
            host: None,
        };
        assert!(matches!(
            request.into_export(&RobotConfig::default()),
            Err(RequestError::Poses(RecordedPosesError::Empty))
        ));
    }

    #[test]
    fn test_unit_messages() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Stop);
        assert_eq!(serde_json::to_string(&ServerMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_event_message_nests_tag() {
        let msg = ServerMessage::Event {
            event: ExportEvent::FrameSent {
                frame_index: 3,
                cycle: 0,
            },
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "frame_sent");
        assert_eq!(value["event"]["frame_index"], 3);
    }

    #[test]
    fn test_validation_error_carries_report() {
        let report = ValidationReport {
            classification: Classification::Rejected,
            violations: Vec::new(),
            loop_checked: false,
        };
        let msg = ServerMessage::export_failed(&ExportError::ValidationRejected(report.clone()));
        let ServerMessage::Error { report: Some(carried), .. } = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(carried, report);

        let json = serde_json::to_string(&ServerMessage::export_failed(&ExportError::SessionBusy)).unwrap();
        assert!(!json.contains("report"));
    }
}
