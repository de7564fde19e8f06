//! ISOTHERM - Isothermal Self-Heating & Electromigration Characterization
//!
//! Drives a resistive thin-film test structure through the multi-phase
//! characterization procedure: a baseline ramp-up that establishes the
//! calibration and a first thermal-resistance estimate, then a closed-loop
//! temperature staircase that converges on the stress temperature, then a
//! persisted handoff to the constant-stress phase.
//!
//! The instrument is abstracted behind [`hardware::SourceMeter`]; the phase
//! executors run identically against the Keithley 2450 driver and the
//! simulated line model in [`mock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod baseline;
pub mod calibration;
pub mod cycle_log;
pub mod error;
pub mod failure;
pub mod mock;
pub mod point;
pub mod session;
pub mod settle;
pub mod staircase;
pub mod tcr;
pub mod thermal;

pub use crate::baseline::{BaselineConfig, BaselineExecutor, BaselineOutcome, BaselineReport};
pub use crate::calibration::{Calibration, CalibrationError};
pub use crate::cycle_log::CycleLog;
pub use crate::error::PhaseError;
pub use crate::failure::{FailureReason, FailureThreshold};
pub use crate::point::OperatingPoint;
pub use crate::session::{BaselineRecord, SessionError, SessionStorage, StressRecord};
pub use crate::settle::{NoSettle, RealTimeSettle, SettlePolicy};
pub use crate::staircase::{
    CycleAction, StaircaseConfig, StaircaseController, StaircaseExecutor, StaircaseOutcome,
    StaircaseState,
};
pub use crate::tcr::{TcrError, TcrTable};
pub use crate::thermal::ThermalResistance;

/// Cooperative cancellation flag.
///
/// Phase executors check it at each measurement-cycle boundary; a set flag
/// ends the run with the output forced off.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    /// A new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_flag_is_shared_between_clones() {
        let flag = AbortFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_set());
        flag.set();
        assert!(clone.is_set());
    }
}
