//! Export controller: one export at a time, from pose source to robot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use binder_core::{
    Classification, ConnectionError, Connector, EventStore, ExportEvent, ExportId, ExportParams,
    ExportState, PoseSource, TrajectoryError, ValidationReport,
};
use binder_motion::{
    Acknowledgement, AcknowledgementHandler, BuildError, MappingError, SamplingError,
    build_trajectory, validate,
};
use binder_robot::{CommandStreamer, StreamControl, StreamError, StreamSummary};
use uuid::Uuid;

/// Export controller error.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("An export is already running")]
    SessionBusy,
    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),
    #[error("Trajectory rejected: {0}")]
    ValidationRejected(ValidationReport),
    #[error("Loop seam warning not acknowledged: {0}")]
    ValidationWarning(ValidationReport),
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl From<BuildError> for ExportError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Sampling(e) => Self::Sampling(e),
            BuildError::Mapping(e) => Self::Mapping(e),
            BuildError::Trajectory(e) => Self::Trajectory(e),
        }
    }
}

/// Result of an export that ran to a clean end.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub export_id: ExportId,
    pub frames: usize,
    pub report: ValidationReport,
    pub summary: StreamSummary,
}

/// Export currently holding the busy slot.
struct ActiveExport {
    export_id: ExportId,
    control: Arc<StreamControl>,
}

/// Releases the busy slot and returns to `Idle` however the run ends.
///
/// If the run is dropped while its stream is still emitting, the stream is
/// asked to stop and kept as draining until it has sent its stop command.
struct ActiveGuard<'a, C: Connector> {
    controller: &'a ExportController<C>,
}

impl<C: Connector> Drop for ActiveGuard<'_, C> {
    fn drop(&mut self) {
        let released = self.controller.active_slot().take();
        if let Some(active) = released.filter(|a| a.control.is_streaming()) {
            tracing::warn!(export_id = %active.export_id, "Export dropped while streaming, stopping");
            active.control.request_stop();
            *self.controller.draining_slot() = Some(active.control);
        }
        self.controller.set_state(ExportState::Idle);
    }
}

/// Drives exports through `Idle → Sampling → Validating → (Rejected |
/// Streaming) → Idle`.
///
/// Share it behind an `Arc`: `run_export` occupies one task while `stop`,
/// `cancel` and `state` are called from others.
pub struct ExportController<C: Connector> {
    connector: C,
    events: Arc<EventStore>,
    acknowledger: Option<Arc<dyn AcknowledgementHandler>>,
    state: Mutex<ExportState>,
    active: Mutex<Option<ActiveExport>>,
    /// Stream of an abandoned run that has not sent its stop command yet.
    draining: Mutex<Option<Arc<StreamControl>>>,
}

impl<C: Connector> ExportController<C> {
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            events: Arc::new(EventStore::new()),
            acknowledger: None,
            state: Mutex::new(ExportState::Idle),
            active: Mutex::new(None),
            draining: Mutex::new(None),
        }
    }

    /// Ask `handler` about loop seam warnings not acknowledged up front.
    #[must_use]
    pub fn with_acknowledgement_handler(mut self, handler: Arc<dyn AcknowledgementHandler>) -> Self {
        self.acknowledger = Some(handler);
        self
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier of the running export, if any.
    #[must_use]
    pub fn active_export(&self) -> Option<ExportId> {
        self.active_slot().as_ref().map(|a| a.export_id)
    }

    /// Index of the frame most recently sent by the running export.
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        self.active_slot().as_ref().map(|a| a.control.frame_index())
    }

    /// Request a graceful stop. Returns `false` if nothing is running.
    pub fn stop(&self) -> bool {
        self.active_slot().as_ref().is_some_and(|a| {
            tracing::info!(export_id = %a.export_id, "Stop requested");
            a.control.request_stop();
            true
        })
    }

    /// Request an abort. Returns `false` if nothing is running.
    pub fn cancel(&self) -> bool {
        self.active_slot().as_ref().is_some_and(|a| {
            tracing::info!(export_id = %a.export_id, "Cancel requested");
            a.control.request_cancel();
            true
        })
    }

    /// Sample, validate and stream one export.
    ///
    /// Returns once the stream completes, is stopped or cancelled, or fails.
    /// A looped export only returns after `stop` or `cancel`.
    ///
    /// # Errors
    /// Returns error if another export is running, the poses cannot be
    /// turned into a valid trajectory, validation refuses it, or the robot
    /// link fails.
    pub async fn run_export<S: PoseSource + ?Sized>(
        &self,
        params: &ExportParams,
        source: &S,
    ) -> Result<ExportOutcome, ExportError> {
        let control = StreamControl::new();
        let export_id = Uuid::new_v4();
        let _guard = self.claim(export_id, Arc::clone(&control))?;

        self.events.clear();
        self.events.push(ExportEvent::Started { export_id });
        tracing::info!(
            %export_id,
            start = params.range.start,
            end = params.range.end,
            rate = params.sample_rate,
            looped = params.looped,
            "Export started"
        );

        let result = self.execute(export_id, params, source, control).await;
        match &result {
            Ok(outcome) => {
                if let Some(termination) = outcome.summary.termination {
                    self.events.push(ExportEvent::Finished { termination });
                }
            }
            Err(e) => {
                tracing::warn!(%export_id, "Export failed: {e}");
                self.events.push(ExportEvent::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn execute<S: PoseSource + ?Sized>(
        &self,
        export_id: ExportId,
        params: &ExportParams,
        source: &S,
        control: Arc<StreamControl>,
    ) -> Result<ExportOutcome, ExportError> {
        let robot = &params.robot;

        self.set_state(ExportState::Sampling);
        let trajectory = build_trajectory(
            source,
            params.range,
            params.sample_rate,
            robot.controller_rate,
            robot.corrections,
        )?;
        let frames = trajectory.len();
        self.events.push(ExportEvent::Sampled { frames });

        self.set_state(ExportState::Validating);
        let report = validate(&trajectory, &robot.limits, params.looped);
        self.events.push(ExportEvent::Validated {
            classification: report.classification,
            violations: report.violations.len(),
        });

        match report.classification {
            Classification::Ok => {}
            Classification::Rejected => {
                self.set_state(ExportState::Rejected);
                return Err(ExportError::ValidationRejected(report));
            }
            Classification::WarnLoopDiscontinuity => {
                if !params.acknowledge_loop_warning && !self.ask_acknowledgement(&report).await {
                    return Err(ExportError::ValidationWarning(report));
                }
                tracing::warn!(%export_id, "Streaming despite loop seam warning");
                self.events.push(ExportEvent::LoopWarningAcknowledged);
            }
        }

        if let Some(termination) = control.halt_requested() {
            tracing::info!(%export_id, ?termination, "Halted before streaming");
            return Ok(ExportOutcome {
                export_id,
                frames,
                report,
                summary: StreamSummary {
                    termination: Some(termination),
                    ..StreamSummary::default()
                },
            });
        }

        let endpoint = robot.endpoint()?;
        self.set_state(ExportState::Streaming);
        let streamer = CommandStreamer::new(
            &self.connector,
            endpoint,
            robot.stream,
            Arc::clone(&self.events),
        );
        let handle = streamer
            .start_with_control(Arc::new(trajectory), params.looped, control)
            .await?;
        let summary = handle.join().await?;

        Ok(ExportOutcome {
            export_id,
            frames,
            report,
            summary,
        })
    }

    async fn ask_acknowledgement(&self, report: &ValidationReport) -> bool {
        let Some(handler) = &self.acknowledger else {
            return false;
        };
        match handler.acknowledge_loop_warning(report).await {
            Ok(Acknowledgement::Accepted) => true,
            Ok(Acknowledgement::Declined { reason }) => {
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "Loop seam warning declined");
                false
            }
            Err(e) => {
                tracing::warn!("Acknowledgement failed, treating as declined: {e}");
                false
            }
        }
    }

    fn claim(
        &self,
        export_id: ExportId,
        control: Arc<StreamControl>,
    ) -> Result<ActiveGuard<'_, C>, ExportError> {
        let mut slot = self.active_slot();
        if slot.is_some() {
            return Err(ExportError::SessionBusy);
        }
        let mut draining = self.draining_slot();
        if draining.as_ref().is_some_and(|c| c.is_streaming()) {
            return Err(ExportError::SessionBusy);
        }
        *draining = None;
        *slot = Some(ActiveExport { export_id, control });
        Ok(ActiveGuard { controller: self })
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<ActiveExport>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn draining_slot(&self) -> MutexGuard<'_, Option<Arc<StreamControl>>> {
        self.draining.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ExportState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == state {
            return;
        }
        tracing::debug!(from = ?*current, to = ?state, "Export state change");
        *current = state;
        drop(current);
        self.events.push(ExportEvent::StateChanged { state });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use binder_core::{JointAngles, RobotConfig, StreamSettings, Termination, TimeRange};
    use binder_motion::{AcceptAll, AcknowledgementError, DeclineAll};
    use binder_robot::mock::MockConnector;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const RATE: f64 = 25.0;

    fn robot() -> RobotConfig {
        RobotConfig {
            host: Some("mock".to_string()),
            stream: StreamSettings {
                approach: None,
                write_timeout_ms: 1000,
                ..StreamSettings::default()
            },
            ..RobotConfig::default()
        }
    }

    fn params(seconds: f64) -> ExportParams {
        ExportParams::new(TimeRange::new(0.0, seconds), RATE).with_robot(robot())
    }

    /// Slow base sweep: 0.5 rad/s, well inside default limits.
    fn gentle(t: f64) -> JointAngles {
        [0.5 * t, 0.0, 0.0, 0.0, 0.0, 0.0]
    }

    /// 2 rad/s base ramp; fine inside, but the jump back to zero at the
    /// loop seam is far too fast.
    fn ramp(t: f64) -> JointAngles {
        [2.0 * t, 0.0, 0.0, 0.0, 0.0, 0.0]
    }

    async fn wait_for_state<C: Connector>(controller: &ExportController<C>, state: ExportState) {
        while controller.state() != state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn servo_count(commands: &[String]) -> usize {
        commands.iter().filter(|c| c.starts_with("servoj(")).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_export_streams_every_frame() {
        let connector = MockConnector::new();
        let controller = ExportController::new(connector.clone());

        let outcome = assert_ok!(controller.run_export(&params(2.0), &gentle).await);

        assert_eq!(outcome.report.classification, Classification::Ok);
        assert_eq!(outcome.frames, 50);
        assert_eq!(outcome.summary.termination, Some(Termination::Completed));
        assert_eq!(servo_count(&connector.delivered()), 50);
        assert_eq!(controller.state(), ExportState::Idle);
        assert_eq!(controller.active_export(), None);

        let history = controller.events().get_history();
        assert!(matches!(history.first(), Some(ExportEvent::Started { .. })));
        assert_eq!(
            history.last(),
            Some(&ExportEvent::StateChanged {
                state: ExportState::Idle
            })
        );
        assert!(history.contains(&ExportEvent::Finished {
            termination: Termination::Completed
        }));
    }

    #[tokio::test]
    async fn test_rejected_export_never_connects() {
        let connector = MockConnector::new();
        let controller = ExportController::new(connector.clone());
        // Base jumps 1 rad between two frames: 25 rad/s.
        let jumpy = |t: f64| -> JointAngles {
            let base = if t >= 0.5 { 1.0 } else { 0.0 };
            [base, 0.0, 0.0, 0.0, 0.0, 0.0]
        };

        let err = assert_err!(controller.run_export(&params(1.0), &jumpy).await);

        let report = match err {
            ExportError::ValidationRejected(report) => report,
            other => panic!("expected rejection, got {other:?}"),
        };
        assert_eq!(report.classification, Classification::Rejected);
        assert_eq!(connector.connect_count(), 0);
        assert_eq!(controller.state(), ExportState::Idle);

        let states: Vec<ExportState> = controller
            .events()
            .get_history()
            .into_iter()
            .filter_map(|e| match e {
                ExportEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ExportState::Sampling,
                ExportState::Validating,
                ExportState::Rejected,
                ExportState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_unacknowledged_seam_warning_returns_to_idle() {
        let connector = MockConnector::new();
        let controller = ExportController::new(connector.clone());

        let err = controller
            .run_export(&params(1.0).with_loop(true), &ramp)
            .await
            .unwrap_err();

        let report = match err {
            ExportError::ValidationWarning(report) => report,
            other => panic!("expected seam warning, got {other:?}"),
        };
        assert_eq!(report.classification, Classification::WarnLoopDiscontinuity);
        assert_eq!(connector.connect_count(), 0);
        assert_eq!(controller.state(), ExportState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_ramp_without_loop_is_ok() {
        let controller = ExportController::new(MockConnector::new());
        let outcome = controller.run_export(&params(1.0), &ramp).await.unwrap();
        assert_eq!(outcome.report.classification, Classification::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_seam_warning_streams_until_stopped() {
        let connector = MockConnector::new();
        let controller = Arc::new(ExportController::new(connector.clone()));

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let looped = params(1.0).with_loop(true).acknowledged();
                controller.run_export(&looped, &ramp).await
            })
        };

        wait_for_state(&controller, ExportState::Streaming).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(controller.position().is_some());
        assert!(controller.stop());

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.summary.termination, Some(Termination::Stopped));
        assert!(outcome.summary.cycles_completed >= 2);
        assert_eq!(controller.state(), ExportState::Idle);

        let delivered = connector.delivered();
        assert_eq!(delivered.iter().filter(|c| c.starts_with("stopj(")).count(), 1);
        assert!(delivered.last().unwrap().starts_with("stopj("));
        assert!(
            controller
                .events()
                .get_history()
                .contains(&ExportEvent::LoopWarningAcknowledged)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_handler_decides() {
        let connector = MockConnector::new();
        let declining = ExportController::new(connector.clone())
            .with_acknowledgement_handler(Arc::new(DeclineAll));
        let looped = params(1.0).with_loop(true);
        assert!(matches!(
            declining.run_export(&looped, &ramp).await,
            Err(ExportError::ValidationWarning(_))
        ));
        assert_eq!(connector.connect_count(), 0);

        let accepting = Arc::new(
            ExportController::new(connector.clone())
                .with_acknowledgement_handler(Arc::new(AcceptAll)),
        );
        let task = {
            let accepting = Arc::clone(&accepting);
            tokio::spawn(async move { accepting.run_export(&looped, &ramp).await })
        };
        wait_for_state(&accepting, ExportState::Streaming).await;
        assert!(accepting.cancel());
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.summary.termination, Some(Termination::Cancelled));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_counts_as_decline() {
        struct Unavailable;

        #[async_trait]
        impl AcknowledgementHandler for Unavailable {
            async fn acknowledge_loop_warning(
                &self,
                _report: &ValidationReport,
            ) -> Result<Acknowledgement, AcknowledgementError> {
                Err(AcknowledgementError::ServiceUnavailable)
            }
        }

        let controller = ExportController::new(MockConnector::new())
            .with_acknowledgement_handler(Arc::new(Unavailable));
        let result = controller
            .run_export(&params(1.0).with_loop(true), &ramp)
            .await;
        assert!(matches!(result, Err(ExportError::ValidationWarning(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_export_is_busy() {
        let controller = Arc::new(ExportController::new(MockConnector::new()));

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .run_export(&params(1.0).with_loop(true).acknowledged(), &ramp)
                    .await
            })
        };
        wait_for_state(&controller, ExportState::Streaming).await;
        let running = controller.active_export();

        let second = controller.run_export(&params(1.0), &gentle).await;
        assert!(matches!(second, Err(ExportError::SessionBusy)));
        assert_eq!(controller.state(), ExportState::Streaming);
        assert_eq!(controller.active_export(), running);

        controller.stop();
        task.await.unwrap().unwrap();
        assert_eq!(controller.state(), ExportState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_export_stops_its_stream() {
        let connector = MockConnector::new();
        let controller = Arc::new(ExportController::new(connector.clone()));

        let task = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .run_export(&params(1.0).with_loop(true).acknowledged(), &ramp)
                    .await
            })
        };
        wait_for_state(&controller, ExportState::Streaming).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(controller.state(), ExportState::Idle);
        assert_eq!(controller.active_export(), None);

        // The abandoned stream still holds the robot until its stop goes out.
        let second = controller.run_export(&params(1.0), &gentle).await;
        assert!(matches!(second, Err(ExportError::SessionBusy)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let attempts = connector.attempts().len();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.attempts().len(), attempts);

        let delivered = connector.delivered();
        assert_eq!(delivered.iter().filter(|c| c.starts_with("stopj(")).count(), 1);
        assert!(delivered.last().unwrap().starts_with("stopj("));
        assert_eq!(connector.close_count(), 1);

        let outcome = assert_ok!(controller.run_export(&params(1.0), &gentle).await);
        assert_eq!(outcome.summary.termination, Some(Termination::Completed));
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_non_finite_pose_is_mapping_error() {
        let connector = MockConnector::new();
        let controller = ExportController::new(connector.clone());
        let broken = |t: f64| -> JointAngles {
            let elbow = if t > 0.3 { f64::INFINITY } else { 0.0 };
            [0.0, 0.0, elbow, 0.0, 0.0, 0.0]
        };

        let result = controller.run_export(&params(1.0), &broken).await;
        assert!(matches!(result, Err(ExportError::Mapping(MappingError::NonFinite { .. }))));
        assert_eq!(connector.connect_count(), 0);
        assert_eq!(controller.state(), ExportState::Idle);
        assert!(matches!(
            controller.events().get_history().iter().rev().nth(1),
            Some(ExportEvent::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_mismatch_is_sampling_error() {
        let controller = ExportController::new(MockConnector::new());
        let mut odd = params(1.0);
        odd.sample_rate = 24.0;
        let result = controller.run_export(&odd, &gentle).await;
        assert!(matches!(
            result,
            Err(ExportError::Sampling(SamplingError::RateMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_connection_errors() {
        let refused = ExportController::new(MockConnector::refusing());
        let result = refused.run_export(&params(1.0), &gentle).await;
        assert!(matches!(
            result,
            Err(ExportError::Connection(ConnectionError::Refused(_)))
        ));
        assert_eq!(refused.state(), ExportState::Idle);

        let connector = MockConnector::new();
        let no_host = ExportController::new(connector.clone());
        let mut unaddressed = params(1.0);
        unaddressed.robot.host = None;
        let result = no_host.run_export(&unaddressed, &gentle).await;
        assert!(matches!(
            result,
            Err(ExportError::Connection(ConnectionError::MissingHost))
        ));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_surfaces_and_releases_slot() {
        let connector = MockConnector::failing_after(9);
        let controller = ExportController::new(connector.clone());

        let result = controller.run_export(&params(2.0), &gentle).await;
        assert!(matches!(
            result,
            Err(ExportError::Stream(StreamError::Transmission { frame_index: 9, .. }))
        ));
        let attempts = connector.attempts();
        assert_eq!(attempts.iter().filter(|c| c.starts_with("stopj(")).count(), 1);
        assert_eq!(servo_count(&attempts), 10);
        assert_eq!(controller.state(), ExportState::Idle);
        assert_eq!(controller.active_export(), None);
    }

    #[tokio::test]
    async fn test_cancel_before_streaming_skips_connection() {
        let connector = MockConnector::new();
        let controller = Arc::new(ExportController::new(connector.clone()));
        let cancelling = {
            let controller = Arc::clone(&controller);
            move |t: f64| -> JointAngles {
                controller.cancel();
                gentle(t)
            }
        };

        let outcome = controller.run_export(&params(1.0), &cancelling).await.unwrap();
        assert_eq!(outcome.summary.termination, Some(Termination::Cancelled));
        assert_eq!(outcome.summary.frames_sent, 0);
        assert_eq!(connector.connect_count(), 0);
    }

    #[test]
    fn test_stop_without_export() {
        let controller = ExportController::new(MockConnector::new());
        assert!(!controller.stop());
        assert!(!controller.cancel());
        assert_eq!(controller.position(), None);
    }
}
