//! Fixed-rate sampling of the animated rig.

use binder_core::{PoseSource, RigPose, TimeRange};
use thiserror::Error;

/// Slack allowed when checking that the controller rate is a whole multiple
/// of the sample rate.
const RATE_RATIO_TOLERANCE: f64 = 1e-6;

/// Sampling error.
#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("Invalid sample rate: {0}")]
    InvalidRate(f64),
    #[error("Invalid controller rate: {0}")]
    InvalidControllerRate(f64),
    #[error(
        "Sample rate {sample_rate} Hz is not a whole divisor of the controller rate {controller_rate} Hz"
    )]
    RateMismatch { sample_rate: f64, controller_rate: f64 },
    #[error("Time range [{start}, {end}) contains no samples")]
    EmptyRange { start: f64, end: f64 },
}

/// Walks a time range at a fixed rate, evaluating the rig at each tick.
///
/// Cheap to iterate more than once: every call to [`PoseSampler::iter`]
/// starts again from the first tick.
pub struct PoseSampler<'a, S: PoseSource + ?Sized> {
    source: &'a S,
    range: TimeRange,
    sample_rate: f64,
    ticks: u64,
}

impl<'a, S: PoseSource + ?Sized> PoseSampler<'a, S> {
    /// Create a sampler.
    ///
    /// The controller consumes one command every `1 / controller_rate`
    /// seconds; each sample must cover a whole number of those periods.
    ///
    /// # Errors
    /// Returns error if either rate is invalid, the rates do not divide
    /// evenly, or the range holds no ticks.
    pub fn new(
        source: &'a S,
        range: TimeRange,
        sample_rate: f64,
        controller_rate: f64,
    ) -> Result<Self, SamplingError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(SamplingError::InvalidRate(sample_rate));
        }
        if !(controller_rate.is_finite() && controller_rate > 0.0) {
            return Err(SamplingError::InvalidControllerRate(controller_rate));
        }

        let ratio = controller_rate / sample_rate;
        if ratio < 1.0 - RATE_RATIO_TOLERANCE || (ratio - ratio.round()).abs() > RATE_RATIO_TOLERANCE {
            return Err(SamplingError::RateMismatch {
                sample_rate,
                controller_rate,
            });
        }

        let span = range.duration() * sample_rate;
        if !span.is_finite() || span <= 0.0 {
            return Err(SamplingError::EmptyRange {
                start: range.start,
                end: range.end,
            });
        }
        // End is exclusive; the epsilon keeps 48.000000001 from becoming 49 ticks.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ticks = (span - 1e-9).ceil().max(0.0) as u64;
        if ticks == 0 {
            return Err(SamplingError::EmptyRange {
                start: range.start,
                end: range.end,
            });
        }

        Ok(Self {
            source,
            range,
            sample_rate,
            ticks,
        })
    }

    /// Number of samples this sampler produces.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.ticks
    }

    /// Always false; construction rejects empty ranges.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ticks == 0
    }

    #[must_use]
    pub const fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Animation time of tick `tick`.
    #[must_use]
    pub fn time_of(&self, tick: u64) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let offset = tick as f64 / self.sample_rate;
        self.range.start + offset
    }

    /// Lazily evaluate the rig, one pose per tick.
    #[must_use]
    pub fn iter(&self) -> Samples<'_, 'a, S> {
        Samples {
            sampler: self,
            next: 0,
        }
    }
}

/// Iterator over rig poses, see [`PoseSampler::iter`].
pub struct Samples<'s, 'a, S: PoseSource + ?Sized> {
    sampler: &'s PoseSampler<'a, S>,
    next: u64,
}

impl<S: PoseSource + ?Sized> Iterator for Samples<'_, '_, S> {
    type Item = RigPose;

    fn next(&mut self) -> Option<RigPose> {
        if self.next >= self.sampler.ticks {
            return None;
        }
        let tick = self.next;
        self.next += 1;
        let time = self.sampler.time_of(tick);
        Some(RigPose {
            tick,
            time,
            angles: self.sampler.source.joint_angles(time),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.sampler.ticks - self.next).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<S: PoseSource + ?Sized> ExactSizeIterator for Samples<'_, '_, S> {}
