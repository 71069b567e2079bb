//! Robot description: joint limits, rig-to-robot corrections, link settings.

use std::{f64::consts::PI, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    pose::{JOINT_COUNT, Joint},
    traits::ConnectionError,
};

/// Port of the controller's secondary interface, which accepts script text.
pub const DEFAULT_SCRIPT_PORT: u16 = 30002;

/// Servo command rate of a CB-series controller (Hz).
pub const DEFAULT_CONTROLLER_RATE: f64 = 125.0;

/// Static limits for one joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointLimit {
    /// Lowest reachable angle (rad).
    pub min_angle: f64,
    /// Highest reachable angle (rad).
    pub max_angle: f64,
    /// rad/s
    pub max_velocity: f64,
    /// rad/s²
    pub max_acceleration: f64,
}

impl JointLimit {
    #[must_use]
    pub const fn new(min_angle: f64, max_angle: f64, max_velocity: f64, max_acceleration: f64) -> Self {
        Self {
            min_angle,
            max_angle,
            max_velocity,
            max_acceleration,
        }
    }
}

impl Default for JointLimit {
    fn default() -> Self {
        Self::new(-2.0 * PI, 2.0 * PI, PI, 15.0)
    }
}

/// Limits for all six joints. Read-only once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct JointLimits {
    joints: [JointLimit; JOINT_COUNT],
}

impl JointLimits {
    #[must_use]
    pub const fn new(joints: [JointLimit; JOINT_COUNT]) -> Self {
        Self { joints }
    }

    /// Same limit on every joint.
    #[must_use]
    pub const fn uniform(limit: JointLimit) -> Self {
        Self {
            joints: [limit; JOINT_COUNT],
        }
    }

    #[must_use]
    pub const fn joint(&self, joint: Joint) -> &JointLimit {
        &self.joints[joint.index()]
    }

    /// Smallest velocity limit across joints.
    #[must_use]
    pub fn slowest_velocity(&self) -> f64 {
        self.joints
            .iter()
            .map(|j| j.max_velocity)
            .fold(f64::INFINITY, f64::min)
    }

    /// Smallest acceleration limit across joints.
    #[must_use]
    pub fn slowest_acceleration(&self) -> f64 {
        self.joints
            .iter()
            .map(|j| j.max_acceleration)
            .fold(f64::INFINITY, f64::min)
    }
}

/// Unit the rig reports joint angles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnit {
    #[default]
    Radians,
    Degrees,
}

/// Sign flip and zero offset for one joint: `robot = sign * rig + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCorrection {
    pub sign: f64,
    /// Radians, applied after unit conversion.
    pub offset: f64,
}

impl AxisCorrection {
    pub const IDENTITY: Self = Self::new(1.0, 0.0);

    #[must_use]
    pub const fn new(sign: f64, offset: f64) -> Self {
        Self { sign, offset }
    }
}

/// Rig-to-robot conversion for every joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointCorrections {
    pub unit: AngleUnit,
    pub axes: [AxisCorrection; JOINT_COUNT],
}

impl JointCorrections {
    /// Corrections for the stock UR5 armature: shoulder and wrist 1 rest a
    /// quarter turn off the controller zero, every joint but the base is mirrored.
    #[must_use]
    pub const fn ur5() -> Self {
        Self {
            unit: AngleUnit::Radians,
            axes: [
                AxisCorrection::new(1.0, 0.0),
                AxisCorrection::new(-1.0, -PI / 2.0),
                AxisCorrection::new(-1.0, 0.0),
                AxisCorrection::new(-1.0, -PI / 2.0),
                AxisCorrection::new(-1.0, 0.0),
                AxisCorrection::new(-1.0, 0.0),
            ],
        }
    }

    #[must_use]
    pub const fn identity(unit: AngleUnit) -> Self {
        Self {
            unit,
            axes: [AxisCorrection::IDENTITY; JOINT_COUNT],
        }
    }

    #[must_use]
    pub const fn axis(&self, joint: Joint) -> &AxisCorrection {
        &self.axes[joint.index()]
    }
}

impl Default for JointCorrections {
    fn default() -> Self {
        Self::ur5()
    }
}

/// Joint move to the first frame before paced streaming begins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproachMove {
    /// rad/s²
    pub acceleration: f64,
    /// rad/s
    pub velocity: f64,
    /// Wait after sending the move before the first servo command.
    pub settle_ms: u64,
}

impl ApproachMove {
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for ApproachMove {
    fn default() -> Self {
        Self {
            acceleration: 1.4,
            velocity: 1.05,
            settle_ms: 3000,
        }
    }
}

/// Servo and link parameters for the command streamer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// servoj lookahead time (s), 0.03..=0.2 on the controller.
    pub lookahead_time: f64,
    /// servoj proportional gain, 100..=2000 on the controller.
    pub gain: f64,
    /// Deceleration used by the stop command (rad/s²).
    pub stop_deceleration: f64,
    /// Upper bound on a single command write before it counts as failed.
    pub write_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub approach: Option<ApproachMove>,
}

impl StreamSettings {
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            lookahead_time: 0.1,
            gain: 300.0,
            stop_deceleration: 2.0,
            write_timeout_ms: 50,
            connect_timeout_ms: 2000,
            approach: Some(ApproachMove::default()),
        }
    }
}

/// Everything the core needs to know about the target robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Controller address. No default: must be configured before streaming.
    pub host: Option<String>,
    pub script_port: u16,
    /// Servo rate the controller consumes commands at (Hz).
    pub controller_rate: f64,
    pub limits: JointLimits,
    pub corrections: JointCorrections,
    pub stream: StreamSettings,
}

impl RobotConfig {
    /// Resolve the controller endpoint.
    ///
    /// # Errors
    /// Returns error if no host is configured.
    pub fn endpoint(&self) -> Result<RobotEndpoint, ConnectionError> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .ok_or(ConnectionError::MissingHost)?;
        Ok(RobotEndpoint::new(host, self.script_port))
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: None,
            script_port: DEFAULT_SCRIPT_PORT,
            controller_rate: DEFAULT_CONTROLLER_RATE,
            limits: JointLimits::default(),
            corrections: JointCorrections::default(),
            stream: StreamSettings::default(),
        }
    }
}

/// Network address of a robot controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotEndpoint {
    pub host: String,
    pub port: u16,
}

impl RobotEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for RobotEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_host() {
        let config = RobotConfig::default();
        assert_eq!(config.script_port, 30002);
        assert!(matches!(config.endpoint(), Err(ConnectionError::MissingHost)));
    }

    #[test]
    fn test_endpoint_resolves() {
        let config = RobotConfig {
            host: Some("10.0.0.2".to_string()),
            ..RobotConfig::default()
        };
        assert_eq!(config.endpoint().unwrap().to_string(), "10.0.0.2:30002");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: RobotConfig =
            serde_json::from_str(r#"{"host": "192.168.1.5", "stream": {"gain": 500.0}}"#).unwrap();
        assert_eq!(config.host.as_deref(), Some("192.168.1.5"));
        assert_eq!(config.stream.gain, 500.0);
        assert_eq!(config.stream.lookahead_time, 0.1);
        assert_eq!(config.corrections, JointCorrections::ur5());
    }

    #[test]
    fn test_limits_serialize_as_array() {
        let limits = JointLimits::uniform(JointLimit::new(-1.0, 1.0, 2.0, 3.0));
        let json = serde_json::to_value(limits).unwrap();
        assert_eq!(json.as_array().map(Vec::len), Some(JOINT_COUNT));
        assert_eq!(limits.slowest_velocity(), 2.0);
        assert_eq!(limits.slowest_acceleration(), 3.0);
    }

    #[test]
    fn test_ur5_corrections() {
        let corrections = JointCorrections::ur5();
        assert_eq!(corrections.axis(Joint::Base).sign, 1.0);
        assert_eq!(corrections.axis(Joint::Shoulder).offset, -PI / 2.0);
        assert_eq!(corrections.axis(Joint::Wrist3).sign, -1.0);
    }
}
