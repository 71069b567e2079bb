//! Core data model for animation-to-robot export.
//!
//! This crate provides the fundamental building blocks:
//! - `FramePose` / `Trajectory` - Sampled joint-space motion
//! - `RobotConfig` / `JointLimits` - Static robot description
//! - `ExportParams` - Parameters for one export run
//! - `EventStore` - Broadcast + history of progress events
//! - `PoseSource`, `RobotLink`, `Connector` - Seams to the rig and controller

pub mod config;
pub mod context;
pub mod event;
pub mod event_store;
pub mod pose;
pub mod report;
pub mod robot;
pub mod traits;

pub use config::{BinderConfig, ConfigError};
pub use context::{ExportId, ExportParams};
pub use event::{ExportEvent, ExportState, Termination};
pub use event_store::EventStore;
pub use pose::{FramePose, JOINT_COUNT, Joint, JointAngles, RigPose, TimeRange, Trajectory, TrajectoryError};
pub use report::{Classification, LimitKind, Transition, ValidationReport, Violation};
pub use robot::{
    AngleUnit, ApproachMove, AxisCorrection, JointCorrections, JointLimit, JointLimits, RobotConfig,
    RobotEndpoint, StreamSettings,
};
pub use traits::{ConnectionError, Connector, LinkError, PoseSource, RobotLink};
