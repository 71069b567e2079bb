//! Operator acknowledgement of loop seam warnings.

use async_trait::async_trait;
use binder_core::ValidationReport;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator decision on a loop seam warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Acknowledgement {
    /// Stream anyway; the arm may move rapidly across the seam.
    Accepted,
    Declined { reason: Option<String> },
}

/// Acknowledgement error.
#[derive(Debug, Error)]
pub enum AcknowledgementError {
    #[error("Acknowledgement service unavailable")]
    ServiceUnavailable,
}

/// Asks the operator whether to stream a trajectory whose loop seam breaks
/// a limit.
///
/// Implement this to put a confirmation dialog in front of the operator.
/// Errors count as a decline.
#[async_trait]
pub trait AcknowledgementHandler: Send + Sync {
    async fn acknowledge_loop_warning(
        &self,
        report: &ValidationReport,
    ) -> Result<Acknowledgement, AcknowledgementError>;
}

/// Declines every warning. The default when no operator is present.
#[derive(Debug, Default, Clone)]
pub struct DeclineAll;

#[async_trait]
impl AcknowledgementHandler for DeclineAll {
    async fn acknowledge_loop_warning(
        &self,
        _report: &ValidationReport,
    ) -> Result<Acknowledgement, AcknowledgementError> {
        Ok(Acknowledgement::Declined {
            reason: Some("no operator to acknowledge".to_string()),
        })
    }
}

/// Accepts every warning. For unattended rigs where the seam was reviewed
/// ahead of time.
#[derive(Debug, Default, Clone)]
pub struct AcceptAll;

#[async_trait]
impl AcknowledgementHandler for AcceptAll {
    async fn acknowledge_loop_warning(
        &self,
        report: &ValidationReport,
    ) -> Result<Acknowledgement, AcknowledgementError> {
        tracing::warn!(%report, "Auto-accepting loop seam warning");
        Ok(Acknowledgement::Accepted)
    }
}
