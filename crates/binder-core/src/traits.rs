//! Seams to the outside world: the animation rig and the robot controller.

use async_trait::async_trait;
use thiserror::Error;

use crate::{pose::JointAngles, robot::RobotEndpoint};

/// Time-indexed rig evaluation, supplied by the animation tool.
///
/// Returns the six joint angles in rig units at `time` seconds. The solved
/// pose must be deterministic for a given time.
pub trait PoseSource: Send + Sync {
    fn joint_angles(&self, time: f64) -> JointAngles;
}

impl<F> PoseSource for F
where
    F: Fn(f64) -> JointAngles + Send + Sync,
{
    fn joint_angles(&self, time: f64) -> JointAngles {
        self(time)
    }
}

/// Connection error.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("No robot host configured")]
    MissingHost,
    #[error("Controller at {0} refused the connection")]
    Refused(String),
    #[error("Timed out connecting to {0}")]
    Timeout(String),
    #[error("Cannot reach controller at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

/// Link error while a session is live.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Controller closed the connection")]
    Closed,
    #[error("Controller rejected command: {0}")]
    Rejected(String),
}

/// Live command channel to a robot controller.
#[async_trait]
pub trait RobotLink: Send {
    /// Send one command line. The link appends the line terminator.
    async fn send(&mut self, command: &str) -> Result<(), LinkError>;

    /// Flush and close the channel. Safe to call more than once.
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Factory for robot links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a control session with the controller at `endpoint`.
    async fn connect(&self, endpoint: &RobotEndpoint)
    -> Result<Box<dyn RobotLink>, ConnectionError>;
}
