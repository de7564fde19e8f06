//! Running thermal-resistance estimate.

use tracing::debug;

/// Smallest power the controller will ever command (W).
///
/// The predictive update divides by the thermal-resistance estimate; flooring
/// the required power keeps a zero or negative request from commanding the
/// source to zero and stalling the loop.
pub const MIN_COMMAND_POWER: f64 = 1e-3;

/// Thermal resistance of the line to the chuck, in °C per Watt.
///
/// Not known a priori and itself temperature-dependent, so it is refined
/// online from each confirmed (temperature, power) operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalResistance {
    celsius_per_watt: f64,
}

impl ThermalResistance {
    /// Start from an initial estimate (typically the baseline phase's).
    pub fn new(celsius_per_watt: f64) -> Self {
        Self { celsius_per_watt }
    }

    /// Current estimate in °C/W.
    pub fn celsius_per_watt(&self) -> f64 {
        self.celsius_per_watt
    }

    /// Refine the estimate from a confirmed operating point.
    ///
    /// `R_th = ΔT / P`. Only updates when the dissipated power is positive
    /// and the result is finite; otherwise the prior estimate is retained.
    /// Returns whether the estimate changed.
    pub fn refine(&mut self, delta_t: f64, power: f64) -> bool {
        if power <= 0.0 {
            return false;
        }
        let updated = delta_t / power;
        if !updated.is_finite() || updated <= 0.0 {
            return false;
        }
        debug!(
            "Thermal resistance refined: {:.2} -> {:.2} °C/W",
            self.celsius_per_watt, updated
        );
        self.celsius_per_watt = updated;
        true
    }

    /// Power required to hold the line `delta_t` above chuck temperature,
    /// floored at [`MIN_COMMAND_POWER`].
    pub fn required_power(&self, delta_t: f64) -> f64 {
        (delta_t / self.celsius_per_watt).max(MIN_COMMAND_POWER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn refine_from_operating_point() {
        let mut r_th = ThermalResistance::new(100.0);
        assert!(r_th.refine(50.0, 0.4));
        assert_relative_eq!(r_th.celsius_per_watt(), 125.0);
    }

    #[test]
    fn refine_retains_prior_on_zero_power() {
        let mut r_th = ThermalResistance::new(100.0);
        assert!(!r_th.refine(50.0, 0.0));
        assert!(!r_th.refine(50.0, -0.1));
        assert_relative_eq!(r_th.celsius_per_watt(), 100.0);
    }

    #[test]
    fn required_power_for_setpoint() {
        let r_th = ThermalResistance::new(100.0);
        // (70 - 20) / 100 = 0.5 W
        assert_relative_eq!(r_th.required_power(50.0), 0.5);
    }

    #[test]
    fn required_power_is_floored() {
        let r_th = ThermalResistance::new(100.0);
        assert_relative_eq!(r_th.required_power(0.0), MIN_COMMAND_POWER);
        assert_relative_eq!(r_th.required_power(-10.0), MIN_COMMAND_POWER);
    }
}
