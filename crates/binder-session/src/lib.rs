//! Export orchestration.
//!
//! Provides:
//! - `ExportController` - Runs one export at a time through sampling,
//!   validation and streaming

pub mod controller;

pub use controller::{ExportController, ExportError, ExportOutcome};
