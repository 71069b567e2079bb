//! Universal Robots controller plumbing.
//!
//! Provides:
//! - `urscript` - Servo, move and stop command encoding plus program rendering
//! - `TcpConnector` / `TcpRobotLink` - Script interface connection
//! - `CommandStreamer` - Paced, skip-ahead frame emission with stop handling

pub mod link;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod streamer;
pub mod urscript;

pub use link::{TcpConnector, TcpRobotLink};
pub use streamer::{CommandStreamer, StreamControl, StreamError, StreamHandle, StreamSummary};
pub use urscript::{ScriptError, UrScript};
