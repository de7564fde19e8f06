//! Per-cycle operating point.

use hardware::Measurement;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;

/// Everything derived from one measurement cycle.
///
/// Never persisted individually; the most recent point per step survives into
/// the session records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Forcing current (A).
    pub current: f64,
    /// Measured voltage (V).
    pub voltage: f64,
    /// Measured resistance (Ω).
    pub resistance: f64,
    /// Estimated junction temperature (°C).
    pub temperature: f64,
    /// Dissipated power (W).
    pub power: f64,
}

impl OperatingPoint {
    /// Derive the operating point from a raw measurement.
    pub fn from_measurement(measurement: &Measurement, calibration: &Calibration) -> Self {
        Self {
            current: measurement.current,
            voltage: measurement.voltage,
            resistance: measurement.resistance,
            temperature: calibration.temperature_from_resistance(measurement.resistance),
            power: measurement.power(),
        }
    }

    /// Temperature rise above the chuck (°C).
    pub fn delta_t(&self, calibration: &Calibration) -> f64 {
        self.temperature - calibration.chuck_temperature
    }
}
