//! Pose sampling, joint-space mapping and trajectory validation.
//!
//! Provides:
//! - `PoseSampler` - Fixed-rate rig evaluation
//! - `JointMapper` - Rig angles to controller joint space
//! - `validate` - Velocity/acceleration/range classification
//! - `build_trajectory` - The three stages above, end to end
//! - `RecordedPoses` - Table-backed pose source
//! - Acknowledgement handler trait for loop seam warnings

pub mod acknowledge;
pub mod mapper;
pub mod recorded;
pub mod sampler;
pub mod validator;

use binder_core::{JointCorrections, PoseSource, TimeRange, Trajectory, TrajectoryError};
use thiserror::Error;

pub use acknowledge::{AcceptAll, Acknowledgement, AcknowledgementError, AcknowledgementHandler, DeclineAll};
pub use mapper::{JointMapper, MappingError};
pub use recorded::{RecordedPoses, RecordedPosesError};
pub use sampler::{PoseSampler, SamplingError};
pub use validator::validate;

/// Failure while turning a pose source into a trajectory.
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
}

/// Sample `source` over `range` and map every tick into joint space.
///
/// Stops at the first malformed pose.
///
/// # Errors
/// Returns error if the sampling parameters are invalid or any pose fails
/// to map.
pub fn build_trajectory<S: PoseSource + ?Sized>(
    source: &S,
    range: TimeRange,
    sample_rate: f64,
    controller_rate: f64,
    corrections: JointCorrections,
) -> Result<Trajectory, BuildError> {
    let sampler = PoseSampler::new(source, range, sample_rate, controller_rate)?;
    let mapper = JointMapper::new(corrections, sample_rate);
    let frames = sampler
        .iter()
        .map(|pose| mapper.map(&pose))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Trajectory::new(frames, sample_rate)?)
}
