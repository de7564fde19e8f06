//! Settling policy.
//!
//! Thermal equilibrium on the bench is reached by waiting; in tests it is
//! reached instantly. The control loops go through this seam instead of
//! sleeping directly so their convergence logic is testable without
//! wall-clock delays.

use std::time::Duration;

/// How a control loop waits out settle and inter-cycle delays.
pub trait SettlePolicy {
    /// Block for the requested duration (or not, for test policies).
    fn settle(&self, duration: Duration);
}

/// Production policy: real wall-clock sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeSettle;

impl SettlePolicy for RealTimeSettle {
    fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Test policy: all delays are instantaneous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettle;

impl SettlePolicy for NoSettle {
    fn settle(&self, _duration: Duration) {}
}
