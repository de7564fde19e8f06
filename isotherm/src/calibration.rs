//! Baseline calibration of the device under test.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from calibration construction.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// Reference resistance must be finite and positive.
    #[error("reference resistance must be finite and positive, got {0} Ω")]
    InvalidReference(f64),

    /// TCR must be finite and positive.
    #[error("TCR must be finite and positive, got {0} K⁻¹")]
    InvalidTcr(f64),

    /// Chuck temperature must be finite.
    #[error("chuck temperature must be finite, got {0} °C")]
    InvalidChuckTemperature(f64),
}

/// Immutable calibration established at the end of the baseline phase.
///
/// Carries everything needed to infer junction temperature from a resistance
/// reading. Passed by reference into each phase; serialized only through the
/// session records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Resistance at chuck temperature and negligible self-heating (Ω).
    pub reference_resistance: f64,
    /// Chuck (ambient) temperature (°C).
    pub chuck_temperature: f64,
    /// Temperature coefficient of resistance (K⁻¹).
    pub tcr: f64,
}

impl Calibration {
    /// Build a calibration, rejecting values that would make the temperature
    /// estimate divide by zero or produce nonsense.
    pub fn new(
        reference_resistance: f64,
        chuck_temperature: f64,
        tcr: f64,
    ) -> Result<Self, CalibrationError> {
        if !reference_resistance.is_finite() || reference_resistance <= 0.0 {
            return Err(CalibrationError::InvalidReference(reference_resistance));
        }
        if !tcr.is_finite() || tcr <= 0.0 {
            return Err(CalibrationError::InvalidTcr(tcr));
        }
        if !chuck_temperature.is_finite() {
            return Err(CalibrationError::InvalidChuckTemperature(chuck_temperature));
        }
        Ok(Self {
            reference_resistance,
            chuck_temperature,
            tcr,
        })
    }

    /// Estimate junction temperature from a resistance reading.
    ///
    /// `T = T_chuck + (R − R_ref) / (R_ref × TCR)`, floored at the chuck
    /// temperature so measurement noise never reports a sub-ambient line.
    pub fn temperature_from_resistance(&self, resistance: f64) -> f64 {
        let t = self.chuck_temperature
            + (resistance - self.reference_resistance) / (self.reference_resistance * self.tcr);
        t.max(self.chuck_temperature)
    }

    /// Expected resistance at a given junction temperature (inverse of the
    /// estimator). Used for failure thresholds and simulated line models.
    pub fn resistance_at_temperature(&self, temperature: f64) -> f64 {
        self.reference_resistance * (1.0 + self.tcr * (temperature - self.chuck_temperature))
    }

    /// Temperature rise above chuck for a resistance reading.
    pub fn delta_t(&self, resistance: f64) -> f64 {
        self.temperature_from_resistance(resistance) - self.chuck_temperature
    }
}
