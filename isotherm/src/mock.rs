//! Mock source-measure unit backed by a self-heating line model.
//!
//! The model is the same physics the estimator assumes: the line sits
//! `R_th × P` above chuck temperature and its resistance follows the TCR law.
//! Solving the two self-consistently gives the closed form
//!
//! `R(I) = R_ref / (1 − R_ref · TCR · R_th · I²)`
//!
//! valid while the denominator stays positive (thermal runaway otherwise).

use hardware::{Measurement, SmuError, SourceMeter};

/// Resistance reported once the simulated line has failed open.
const OPEN_CIRCUIT_RESISTANCE: f64 = 1.0e6;

/// Simulated SMU driving a thin-film line with ideal self-heating physics.
pub struct MockSmu {
    r_ref: f64,
    tcr: f64,
    r_th: f64,
    output_on: bool,
    commanded: Vec<f64>,
    open_circuit_after: Option<u32>,
    comm_failure_after: Option<u32>,
}

impl MockSmu {
    /// A line with the given reference resistance (Ω), TCR (K⁻¹), and thermal
    /// resistance (°C/W).
    pub fn new(r_ref: f64, tcr: f64, r_th: f64) -> Self {
        Self {
            r_ref,
            tcr,
            r_th,
            output_on: false,
            commanded: Vec::new(),
            open_circuit_after: None,
            comm_failure_after: None,
        }
    }

    /// Fail the line open after `n` measurements.
    pub fn with_open_circuit_after(mut self, n: u32) -> Self {
        self.open_circuit_after = Some(n);
        self
    }

    /// Fail instrument communication after `n` measurements.
    pub fn with_comm_failure_after(mut self, n: u32) -> Self {
        self.comm_failure_after = Some(n);
        self
    }

    /// Number of measurements taken so far.
    pub fn measurement_count(&self) -> u32 {
        self.commanded.len() as u32
    }

    /// Every forcing current commanded, in order.
    pub fn commanded_currents(&self) -> &[f64] {
        &self.commanded
    }

    /// Whether the source output is currently on.
    pub fn output_is_on(&self) -> bool {
        self.output_on
    }

    /// The line resistance the model produces at a forcing current.
    pub fn line_resistance(&self, current: f64) -> f64 {
        let denominator = 1.0 - self.r_ref * self.tcr * self.r_th * current * current;
        if denominator <= 0.0 {
            // Thermal runaway: the line burns open.
            return OPEN_CIRCUIT_RESISTANCE;
        }
        self.r_ref / denominator
    }
}

impl SourceMeter for MockSmu {
    fn measure(&mut self, forcing_current: f64) -> Result<Measurement, SmuError> {
        if let Some(n) = self.comm_failure_after {
            if self.measurement_count() >= n {
                return Err(SmuError::Communication(
                    "simulated instrument dropout".to_string(),
                ));
            }
        }

        self.output_on = true;
        self.commanded.push(forcing_current);

        let resistance = if matches!(self.open_circuit_after, Some(n) if self.measurement_count() > n)
        {
            OPEN_CIRCUIT_RESISTANCE
        } else {
            self.line_resistance(forcing_current)
        };

        Ok(Measurement {
            voltage: forcing_current * resistance,
            current: forcing_current,
            resistance,
        })
    }

    fn output_off(&mut self) -> Result<(), SmuError> {
        self.output_on = false;
        Ok(())
    }
}
