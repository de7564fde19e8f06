//! Structural-failure detection.
//!
//! Both policies approximate a "resistance rose faster than thermal physics
//! predicts" check. The two formulas come from different phases of the bench
//! procedure and are kept as named, configurable variants rather than unified
//! (see DESIGN.md).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;

/// Per-phase resistance failure-threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FailureThreshold {
    /// `multiplier × R_ref × (1 + TCR × margin)`: the expected resistance at
    /// `margin` degrees above chuck, scaled by a safety multiplier. Used by
    /// the baseline phase.
    TcrMargin { multiplier: f64, margin_celsius: f64 },

    /// `multiplier × R_ref`: a coarse absolute multiple of the reference
    /// resistance. Used by the staircase phase.
    AbsoluteMultiple { multiplier: f64 },
}

impl FailureThreshold {
    /// The resistance limit for this policy under a given calibration (Ω).
    pub fn limit(&self, calibration: &Calibration) -> f64 {
        match *self {
            FailureThreshold::TcrMargin {
                multiplier,
                margin_celsius,
            } => {
                multiplier
                    * calibration.reference_resistance
                    * (1.0 + calibration.tcr * margin_celsius)
            }
            FailureThreshold::AbsoluteMultiple { multiplier } => {
                multiplier * calibration.reference_resistance
            }
        }
    }

    /// Whether a measured resistance crosses this policy's limit.
    pub fn is_exceeded(&self, resistance: f64, calibration: &Calibration) -> bool {
        resistance >= self.limit(calibration)
    }
}

/// Why a phase declared the structure failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Resistance crossed the structural-failure threshold. With the
    /// staircase policy this means the line resistance doubled and an open
    /// circuit is suspected.
    ResistanceLimit { measured: f64, limit: f64 },

    /// Forcing current exceeded the hard compliance limit.
    ComplianceExceeded { current: f64, limit: f64 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ResistanceLimit { measured, limit } => write!(
                f,
                "resistance limit exceeded: {measured:.4} Ω >= {limit:.4} Ω (open circuit suspected)"
            ),
            FailureReason::ComplianceExceeded { current, limit } => write!(
                f,
                "forcing current {current:.4} A exceeded compliance limit {limit:.4} A"
            ),
        }
    }
}
