//! Transport layer for export drivers.
//!
//! Provides:
//! - Wire protocol (tagged JSON)
//! - WebSocket driver (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ExportRequest, RequestError, ServerMessage};
