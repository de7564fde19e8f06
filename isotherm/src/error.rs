//! Errors shared by the phase executors.
//!
//! Structural failure of the device under test is *not* an error; it is an
//! expected terminal outcome reported through the phase outcome enums. These
//! variants cover the ways a run itself can go wrong.

use thiserror::Error;

use crate::calibration::CalibrationError;
use hardware::SmuError;

/// Fatal errors during a characterization phase.
///
/// Every path that produces one of these forces the instrument output off
/// before propagating.
#[derive(Error, Debug)]
pub enum PhaseError {
    /// Instrument communication failed.
    #[error("instrument error: {0}")]
    Instrument(#[from] SmuError),

    /// The baseline measurement produced an unusable calibration.
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// The cycle log could not be written.
    #[error("cycle log write failed: {0}")]
    Log(#[from] std::io::Error),

    /// The run was cancelled at a cycle boundary.
    #[error("run cancelled")]
    Cancelled,

    /// A staircase step failed to converge within the configured cycle budget.
    #[error("step at {target:.1} °C did not converge within {cycles} cycles")]
    StepTimeout { target: f64, cycles: u32 },

    /// Controller configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
