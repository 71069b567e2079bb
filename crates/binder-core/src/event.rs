//! Export lifecycle states and progress events.

use serde::{Deserialize, Serialize};

use crate::{context::ExportId, report::Classification};

/// Export controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportState {
    #[default]
    Idle,
    Sampling,
    Validating,
    Rejected,
    Streaming,
}

/// How a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Last frame of a one-shot trajectory was sent.
    Completed,
    /// `stop()` was requested.
    Stopped,
    /// Operator abort.
    Cancelled,
}

/// Progress event published while an export runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportEvent {
    Started { export_id: ExportId },
    StateChanged { state: ExportState },
    Sampled { frames: usize },
    Validated {
        classification: Classification,
        violations: usize,
    },
    LoopWarningAcknowledged,
    Connected { endpoint: String },
    FrameSent { frame_index: u64, cycle: u64 },
    /// Emission fell behind and jumped forward.
    FramesSkipped { from_frame: u64, to_frame: u64 },
    CycleCompleted { cycle: u64 },
    StopSent,
    Finished { termination: Termination },
    Failed { message: String },
}

impl ExportEvent {
    /// Terminal events end an export run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Failed { .. })
    }
}
