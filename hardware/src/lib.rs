//! Instrument drivers for the electromigration test bench.
//!
//! Currently contains the Keithley TSP transport and the 2450 SourceMeter
//! driver used to force current through the device under test and read back
//! voltage/resistance.

pub mod keithley;

pub use keithley::{Smu2450, SmuArgs, TspDevice, TspError, TspResult, DEFAULT_TSP_PORT};

use thiserror::Error;

/// Error type for source-measure operations.
///
/// Kept deliberately narrow so that both real drivers and test mocks can
/// construct it. Driver-specific detail (TSP parse failures, socket errors)
/// is flattened into the message.
#[derive(Error, Debug)]
pub enum SmuError {
    /// Communication with the instrument failed. Fatal to the running phase.
    #[error("instrument communication failed: {0}")]
    Communication(String),

    /// The instrument replied, but the reading could not be interpreted.
    #[error("invalid instrument reading: {0}")]
    InvalidReading(String),

    /// The requested source level is outside what the driver will command.
    #[error("source level {requested} A rejected: {reason}")]
    SourceLevel { requested: f64, reason: String },
}

/// One voltage/current/resistance reading taken at a forcing current.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Measured voltage across the device under test (V).
    pub voltage: f64,
    /// Forcing current at which the reading was taken (A).
    pub current: f64,
    /// Derived resistance (Ω).
    pub resistance: f64,
}

impl Measurement {
    /// Dissipated power at this operating point (W).
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

/// Abstraction over a source-measure unit.
///
/// The test procedures are generic over this trait so they can run against
/// real hardware or a simulated line model. The actuator and sensor are the
/// same physical port: implementations must take `&mut self` and callers must
/// never overlap measurement requests.
pub trait SourceMeter {
    /// Force the given current, then measure voltage and derive resistance.
    ///
    /// Blocks until the instrument responds. Turning the output on (if it was
    /// off) is the implementation's responsibility.
    fn measure(&mut self, forcing_current: f64) -> Result<Measurement, SmuError>;

    /// Force the source output off.
    ///
    /// Must be safe to call repeatedly; phase executors call this on every
    /// exit path.
    fn output_off(&mut self) -> Result<(), SmuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measurement_power() {
        let m = Measurement {
            voltage: 2.0,
            current: 0.1,
            resistance: 20.0,
        };
        assert!((m.power() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn smu_error_messages() {
        let err = SmuError::Communication("socket closed".to_string());
        assert_eq!(
            err.to_string(),
            "instrument communication failed: socket closed"
        );

        let err = SmuError::SourceLevel {
            requested: 2.5,
            reason: "exceeds compliance".to_string(),
        };
        assert!(err.to_string().contains("2.5"));
    }
}
