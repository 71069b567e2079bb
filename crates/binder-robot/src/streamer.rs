//! Paced command streaming to the controller.
//!
//! One servo command per frame, sent at `cycle_origin + timestamp`. When
//! emission falls a full interval or more behind, it jumps forward to the
//! frame the clock says should be playing instead of queueing stale
//! commands. Every exit path, including transmission failures, ends with
//! exactly one stop command and a closed link. Dropping the
//! [`StreamHandle`] of a running stream requests a graceful stop, so an
//! abandoned stream still winds down the same way.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use binder_core::{
    ConnectionError, Connector, EventStore, ExportEvent, LinkError, RobotEndpoint, RobotLink,
    StreamSettings, Termination, Trajectory,
};
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};

use crate::urscript;

const HALT_NONE: u8 = 0;
const HALT_STOP: u8 = 1;
const HALT_CANCEL: u8 = 2;

/// Streaming error.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Transmission failed at frame {frame_index}: {source}")]
    Transmission {
        frame_index: u64,
        #[source]
        source: LinkError,
    },
    #[error("Write of frame {frame_index} did not complete within {timeout:?}")]
    WriteTimeout { frame_index: u64, timeout: Duration },
    #[error("Stop command could not be delivered: {0}")]
    StopFailed(String),
    #[error("Streaming task failed: {0}")]
    Task(String),
}

/// Halt flag and playback position shared between the emission task and
/// whoever controls it.
///
/// The emission task is the only writer of the position; the controller is
/// the only writer of the halt flag.
#[derive(Debug, Default)]
pub struct StreamControl {
    halt: AtomicU8,
    frame_index: AtomicU64,
    cycle: AtomicU64,
    streaming: AtomicBool,
}

impl StreamControl {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Graceful stop at the next frame boundary.
    pub fn request_stop(&self) {
        let _ = self
            .halt
            .compare_exchange(HALT_NONE, HALT_STOP, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Operator abort at the next frame boundary.
    pub fn request_cancel(&self) {
        let _ = self
            .halt
            .compare_exchange(HALT_NONE, HALT_CANCEL, Ordering::AcqRel, Ordering::Acquire);
    }

    /// First halt request made, if any.
    #[must_use]
    pub fn halt_requested(&self) -> Option<Termination> {
        match self.halt.load(Ordering::Acquire) {
            HALT_STOP => Some(Termination::Stopped),
            HALT_CANCEL => Some(Termination::Cancelled),
            _ => None,
        }
    }

    /// Index of the frame most recently handed to the link.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    /// Number of completed passes through a looped trajectory.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    /// Whether an emission task still holds the link. Stays set until the
    /// stop command went out and the link is closed.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn set_streaming(&self, streaming: bool) {
        self.streaming.store(streaming, Ordering::Release);
    }

    fn set_position(&self, frame_index: u64, cycle: u64) {
        self.cycle.store(cycle, Ordering::Release);
        self.frame_index.store(frame_index, Ordering::Release);
    }
}

/// What a finished stream did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub frames_sent: u64,
    pub frames_skipped: u64,
    pub cycles_completed: u64,
    pub last_frame: Option<u64>,
    pub termination: Option<Termination>,
}

/// Handle to a running stream.
///
/// Dropping it before the stream ends requests a graceful stop.
pub struct StreamHandle {
    control: Arc<StreamControl>,
    task: JoinHandle<Result<StreamSummary, StreamError>>,
}

impl StreamHandle {
    pub fn stop(&self) {
        self.control.request_stop();
    }

    pub fn cancel(&self) {
        self.control.request_cancel();
    }

    #[must_use]
    pub fn control(&self) -> Arc<StreamControl> {
        Arc::clone(&self.control)
    }

    /// Index of the frame most recently sent.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.control.frame_index()
    }

    /// Wait for the stream to end.
    ///
    /// # Errors
    /// Returns error if a command could not be delivered.
    pub async fn join(mut self) -> Result<StreamSummary, StreamError> {
        (&mut self.task)
            .await
            .map_err(|e| StreamError::Task(e.to_string()))?
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.task.is_finished() && self.control.halt_requested().is_none() {
            tracing::warn!("Stream handle dropped while streaming, stopping");
            self.control.request_stop();
        }
    }
}

/// Owns the connection for one export and paces commands over it.
pub struct CommandStreamer<'c, C: Connector + ?Sized> {
    connector: &'c C,
    endpoint: RobotEndpoint,
    settings: StreamSettings,
    events: Arc<EventStore>,
}

impl<'c, C: Connector + ?Sized> CommandStreamer<'c, C> {
    #[must_use]
    pub const fn new(
        connector: &'c C,
        endpoint: RobotEndpoint,
        settings: StreamSettings,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            settings,
            events,
        }
    }

    /// Connect and begin emission.
    ///
    /// # Errors
    /// Returns error if the controller is unreachable or refuses the session.
    pub async fn start(
        &self,
        trajectory: Arc<Trajectory>,
        looped: bool,
    ) -> Result<StreamHandle, ConnectionError> {
        self.start_with_control(trajectory, looped, StreamControl::new())
            .await
    }

    /// Like [`CommandStreamer::start`], with a control block created earlier
    /// so a halt requested before connecting is honored.
    ///
    /// # Errors
    /// Returns error if the controller is unreachable or refuses the session.
    pub async fn start_with_control(
        &self,
        trajectory: Arc<Trajectory>,
        looped: bool,
        control: Arc<StreamControl>,
    ) -> Result<StreamHandle, ConnectionError> {
        let link = self.connector.connect(&self.endpoint).await?;
        self.events.push(ExportEvent::Connected {
            endpoint: self.endpoint.to_string(),
        });
        tracing::info!(
            endpoint = %self.endpoint,
            frames = trajectory.len(),
            rate = trajectory.sample_rate(),
            looped,
            "Streaming trajectory"
        );

        let emitter = Emitter {
            trajectory,
            looped,
            settings: self.settings,
            control: Arc::clone(&control),
            events: Arc::clone(&self.events),
        };
        control.set_streaming(true);
        let task = tokio::spawn(emitter.run(link));

        Ok(StreamHandle { control, task })
    }
}

/// State of the emission task.
struct Emitter {
    trajectory: Arc<Trajectory>,
    looped: bool,
    settings: StreamSettings,
    control: Arc<StreamControl>,
    events: Arc<EventStore>,
}

impl Emitter {
    async fn run(self, mut link: Box<dyn RobotLink>) -> Result<StreamSummary, StreamError> {
        let mut summary = StreamSummary::default();
        let outcome = self.emit_frames(link.as_mut(), &mut summary).await;

        // Exactly one stop command, whatever happened above.
        let stop = self.send_stop(link.as_mut()).await;
        if let Err(e) = link.close().await {
            tracing::warn!("Closing controller link failed: {e}");
        }
        self.control.set_streaming(false);

        match (outcome, stop) {
            (Ok(termination), Ok(())) => {
                summary.termination = Some(termination);
                tracing::info!(
                    ?termination,
                    sent = summary.frames_sent,
                    skipped = summary.frames_skipped,
                    cycles = summary.cycles_completed,
                    "Stream finished"
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => {
                tracing::error!("Stream ended but stop command failed: {e}");
                Err(StreamError::StopFailed(e.to_string()))
            }
            (Err(e), stop) => {
                tracing::error!(
                    stop_delivered = stop.is_ok(),
                    "Stream aborted: {e}"
                );
                Err(e)
            }
        }
    }

    async fn emit_frames(
        &self,
        link: &mut dyn RobotLink,
        summary: &mut StreamSummary,
    ) -> Result<Termination, StreamError> {
        let frames = self.trajectory.frames();
        let count = frames.len();
        let interval_secs = self.trajectory.sample_interval();
        let interval = Duration::from_secs_f64(interval_secs);
        let cycle_length = Duration::from_secs_f64(self.trajectory.cycle_duration());

        if let Some(approach) = self.settings.approach {
            if let Some(halt) = self.control.halt_requested() {
                return Ok(halt);
            }
            let first = self.trajectory.first();
            let command = urscript::approach_command(first.angles(), &approach);
            self.send_bounded(link, &command, first.frame_index()).await?;
            let settled = Instant::now() + approach.settle();
            if let Some(halt) = self.wait_unless_halted(settled, interval).await {
                return Ok(halt);
            }
        }

        let mut origin = Instant::now();
        let mut position = 0usize;
        let mut cycle = 0u64;

        loop {
            let deadline = origin + Duration::from_secs_f64(self.trajectory.offset_of(position));
            tokio::time::sleep_until(deadline).await;

            if let Some(halt) = self.control.halt_requested() {
                return Ok(halt);
            }

            let late = Instant::now().saturating_duration_since(deadline);
            if late >= interval {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let behind = (late.as_secs_f64() / interval_secs).floor() as usize;
                let from_frame = frames[position].frame_index();
                let target = position + behind;
                let (next, wraps) = if target < count {
                    (target, 0)
                } else if self.looped {
                    (target % count, target / count)
                } else {
                    (count - 1, 0)
                };
                if wraps > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let skipped_cycles = wraps as f64;
                    origin += cycle_length.mul_f64(skipped_cycles);
                    for _ in 0..wraps {
                        cycle += 1;
                        summary.cycles_completed += 1;
                        self.events.push(ExportEvent::CycleCompleted { cycle });
                    }
                    tracing::debug!(cycle, wraps, "Loop cycles completed while skipping");
                }
                let skipped = (wraps * count + next).saturating_sub(position);
                if skipped > 0 {
                    position = next;
                    summary.frames_skipped += skipped as u64;
                    let to_frame = frames[position].frame_index();
                    tracing::warn!(from_frame, to_frame, skipped, "Emission behind schedule, skipping ahead");
                    self.events.push(ExportEvent::FramesSkipped { from_frame, to_frame });
                }
            }

            let frame = &frames[position];
            let command = urscript::servoj(
                frame.angles(),
                interval_secs,
                self.settings.lookahead_time,
                self.settings.gain,
            );
            self.send_bounded(link, &command, frame.frame_index()).await?;

            self.control.set_position(frame.frame_index(), cycle);
            summary.frames_sent += 1;
            summary.last_frame = Some(frame.frame_index());
            self.events.push(ExportEvent::FrameSent {
                frame_index: frame.frame_index(),
                cycle,
            });

            position += 1;
            if position == count {
                if !self.looped {
                    // Let the final servo period play out before holding.
                    let end = origin + Duration::from_secs_f64(self.trajectory.offset_of(count - 1)) + interval;
                    tokio::time::sleep_until(end).await;
                    return Ok(Termination::Completed);
                }
                position = 0;
                origin += cycle_length;
                cycle += 1;
                summary.cycles_completed += 1;
                self.events.push(ExportEvent::CycleCompleted { cycle });
                tracing::debug!(cycle, "Loop cycle completed");
            }
        }
    }

    /// Sleep until `until`, checking for a halt every `step`.
    async fn wait_unless_halted(&self, until: Instant, step: Duration) -> Option<Termination> {
        loop {
            if let Some(halt) = self.control.halt_requested() {
                return Some(halt);
            }
            let now = Instant::now();
            if now >= until {
                return None;
            }
            tokio::time::sleep_until(until.min(now + step)).await;
        }
    }

    async fn send_bounded(
        &self,
        link: &mut dyn RobotLink,
        command: &str,
        frame_index: u64,
    ) -> Result<(), StreamError> {
        let timeout = self.settings.write_timeout();
        match tokio::time::timeout(timeout, link.send(command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(StreamError::Transmission {
                frame_index,
                source,
            }),
            Err(_) => Err(StreamError::WriteTimeout {
                frame_index,
                timeout,
            }),
        }
    }

    async fn send_stop(&self, link: &mut dyn RobotLink) -> Result<(), StreamError> {
        let command = urscript::stopj(self.settings.stop_deceleration);
        let timeout = self.settings.write_timeout();
        let result = match tokio::time::timeout(timeout, link.send(&command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StreamError::StopFailed(e.to_string())),
            Err(_) => Err(StreamError::StopFailed(format!("timed out after {timeout:?}"))),
        };
        match &result {
            Ok(()) => self.events.push(ExportEvent::StopSent),
            Err(e) => tracing::error!("{e}"),
        }
        result
    }
}
