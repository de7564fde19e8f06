//! Baseline / ramp-up phase (open loop).
//!
//! Finds a first (current, resistance, temperature) operating point with a
//! geometric current ramp, establishes the calibration, and derives the
//! initial thermal-resistance estimate handed to the staircase phase.

use std::time::Duration;

use tracing::{info, warn};

use crate::calibration::Calibration;
use crate::cycle_log::CycleLog;
use crate::error::PhaseError;
use crate::failure::{FailureReason, FailureThreshold};
use crate::point::OperatingPoint;
use crate::session::BaselineRecord;
use crate::settle::SettlePolicy;
use crate::AbortFlag;
use hardware::SourceMeter;

/// Configuration for the baseline ramp-up phase.
#[derive(Debug, Clone)]
pub struct BaselineConfig {
    /// Chuck (ambient) temperature (°C).
    pub chuck_temperature: f64,
    /// Current for the self-heating-free reference measurement (A).
    pub probe_current: f64,
    /// First forcing current of the ramp (A).
    pub initial_current: f64,
    /// Geometric ramp ratio, must be > 1.
    pub current_multiplier: f64,
    /// Temperature rise above chuck that ends the ramp (°C).
    pub target_rise: f64,
    /// Minimum ramp iterations before the rise criterion may end the ramp.
    pub min_iterations: u32,
    /// Structural-failure threshold policy for this phase.
    pub failure: FailureThreshold,
    /// Hard forcing-current ceiling (A).
    pub compliance_current: f64,
    /// Delay between ramp cycles.
    pub cycle_delay: Duration,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            chuck_temperature: 20.0,
            probe_current: 1e-4,
            initial_current: 0.01,
            current_multiplier: 1.05,
            target_rise: 50.0,
            min_iterations: 5,
            failure: FailureThreshold::TcrMargin {
                multiplier: 2.0,
                margin_celsius: 50.0,
            },
            compliance_current: 0.1,
            cycle_delay: Duration::ZERO,
        }
    }
}

impl BaselineConfig {
    fn validate(&self) -> Result<(), PhaseError> {
        if !(self.current_multiplier > 1.0) {
            return Err(PhaseError::InvalidConfig(format!(
                "current multiplier must be > 1 for the ramp to terminate, got {}",
                self.current_multiplier
            )));
        }
        if !(self.initial_current > 0.0) || !(self.probe_current > 0.0) {
            return Err(PhaseError::InvalidConfig(
                "probe and initial currents must be positive".to_string(),
            ));
        }
        if !(self.compliance_current > self.initial_current) {
            return Err(PhaseError::InvalidConfig(format!(
                "compliance limit {} A must exceed the initial current {} A",
                self.compliance_current, self.initial_current
            )));
        }
        Ok(())
    }
}

/// Terminal result of the baseline phase.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineOutcome {
    /// The ramp reached the target rise; handoff record ready.
    Converged { record: BaselineRecord },
    /// The structure failed during the ramp. Data collected so far is valid.
    Failed { reason: FailureReason },
}

/// Everything the baseline phase produced.
#[derive(Debug, Clone)]
pub struct BaselineReport {
    /// How the phase ended.
    pub outcome: BaselineOutcome,
    /// Calibration established from the reference measurement.
    pub calibration: Calibration,
    /// Full time series of ramp operating points.
    pub history: Vec<OperatingPoint>,
    /// Ramp iterations executed.
    pub iterations: u32,
}

/// Executor for the baseline phase.
///
/// Exclusively owns the instrument for the duration of the run and forces the
/// output off on every exit path.
pub struct BaselineExecutor<'a, S: SourceMeter, P: SettlePolicy> {
    smu: &'a mut S,
    config: BaselineConfig,
    tcr: f64,
    settle: P,
    log: Option<&'a mut CycleLog>,
    abort: Option<AbortFlag>,
}

impl<'a, S: SourceMeter, P: SettlePolicy> BaselineExecutor<'a, S, P> {
    /// Create an executor with a resolved TCR value.
    pub fn new(smu: &'a mut S, config: BaselineConfig, tcr: f64, settle: P) -> Self {
        Self {
            smu,
            config,
            tcr,
            settle,
            log: None,
            abort: None,
        }
    }

    /// Attach a cycle log; one row is appended per ramp measurement.
    pub fn with_log(mut self, log: &'a mut CycleLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Attach a cancellation flag checked at each cycle boundary.
    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Run the phase to completion.
    pub fn run(mut self) -> Result<BaselineReport, PhaseError> {
        let result = self.run_inner();
        if let Err(off_err) = self.smu.output_off() {
            warn!("Failed to force output off after baseline phase: {off_err}");
            if result.is_ok() {
                return Err(PhaseError::Instrument(off_err));
            }
        }
        result
    }

    fn run_inner(&mut self) -> Result<BaselineReport, PhaseError> {
        self.config.validate()?;

        info!(
            "Measuring baseline resistance at {:.1e} A...",
            self.config.probe_current
        );
        let probe = self.smu.measure(self.config.probe_current)?;
        let calibration = Calibration::new(
            probe.resistance,
            self.config.chuck_temperature,
            self.tcr,
        )?;
        let r_fail = self.config.failure.limit(&calibration);
        info!(
            "R_chuck = {:.4} Ω, failure threshold = {:.4} Ω",
            calibration.reference_resistance, r_fail
        );

        let mut current = self.config.initial_current;
        let mut iteration = 0u32;
        let mut history: Vec<OperatingPoint> = Vec::new();

        info!("Starting ramp-up loop...");
        loop {
            if let Some(flag) = &self.abort {
                if flag.is_set() {
                    return Err(PhaseError::Cancelled);
                }
            }

            let m = self.smu.measure(current)?;
            iteration += 1;
            let point = OperatingPoint::from_measurement(&m, &calibration);

            if let Some(log) = self.log.as_deref_mut() {
                log.record(iteration, &point, &calibration)?;
            }
            info!(
                "[{iteration}] I: {:.4} A | R: {:.4} Ω | ΔT: {:.2} °C",
                point.current,
                point.resistance,
                point.delta_t(&calibration)
            );

            if self.config.failure.is_exceeded(point.resistance, &calibration) {
                let reason = FailureReason::ResistanceLimit {
                    measured: point.resistance,
                    limit: r_fail,
                };
                warn!("Structural failure: {reason}");
                return Ok(BaselineReport {
                    outcome: BaselineOutcome::Failed { reason },
                    calibration,
                    history,
                    iterations: iteration,
                });
            }
            if current > self.config.compliance_current {
                let reason = FailureReason::ComplianceExceeded {
                    current,
                    limit: self.config.compliance_current,
                };
                warn!("Structural failure: {reason}");
                return Ok(BaselineReport {
                    outcome: BaselineOutcome::Failed { reason },
                    calibration,
                    history,
                    iterations: iteration,
                });
            }

            history.push(point);

            if point.temperature >= self.config.chuck_temperature + self.config.target_rise
                && iteration >= self.config.min_iterations
            {
                let delta_t = point.delta_t(&calibration);
                let r_th = delta_t / point.power;
                info!(
                    "Ramp converged after {iteration} iterations: ΔT = {delta_t:.2} °C, \
                     initial R_th = {r_th:.2} °C/W"
                );
                let record = BaselineRecord {
                    r_ref: calibration.reference_resistance,
                    r_th,
                    tcr: calibration.tcr,
                    t_chuck: calibration.chuck_temperature,
                };
                return Ok(BaselineReport {
                    outcome: BaselineOutcome::Converged { record },
                    calibration,
                    history,
                    iterations: iteration,
                });
            }

            current *= self.config.current_multiplier;
            self.settle.settle(self.config.cycle_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSmu;
    use crate::settle::NoSettle;

    fn run_baseline(smu: &mut MockSmu, config: BaselineConfig) -> BaselineReport {
        BaselineExecutor::new(smu, config, 0.0033, NoSettle)
            .run()
            .unwrap()
    }

    #[test]
    fn invalid_multiplier_rejected() {
        let mut smu = MockSmu::new(10.0, 0.0033, 100.0);
        let config = BaselineConfig {
            current_multiplier: 1.0,
            ..Default::default()
        };
        let result = BaselineExecutor::new(&mut smu, config, 0.0033, NoSettle).run();
        assert!(matches!(result, Err(PhaseError::InvalidConfig(_))));
    }

    #[test]
    fn converges_on_ideal_line() {
        // Geometry chosen so the ramp reaches +50 °C before compliance.
        let mut smu = MockSmu::new(10.0, 0.0033, 100.0);
        let config = BaselineConfig {
            initial_current: 0.05,
            compliance_current: 2.0,
            ..Default::default()
        };
        let report = run_baseline(&mut smu, config);

        let record = match report.outcome {
            BaselineOutcome::Converged { record } => record,
            other => panic!("expected convergence, got {other:?}"),
        };
        assert!(report.iterations >= 5);
        assert_eq!(report.history.len() as u32, report.iterations);
        assert!(record.r_th > 0.0);
        // The mock's thermal resistance should be recovered closely.
        assert!((record.r_th - 100.0).abs() / 100.0 < 0.05, "{}", record.r_th);
        // Output forced off on exit.
        assert!(!smu.output_is_on());
    }

    #[test]
    fn compliance_limit_terminates_ramp() {
        // Stiff line: barely heats, so the ramp runs into the current ceiling.
        let mut smu = MockSmu::new(10.0, 0.0033, 0.1);
        let config = BaselineConfig {
            initial_current: 0.01,
            compliance_current: 0.05,
            ..Default::default()
        };
        let report = run_baseline(&mut smu, config);
        assert!(matches!(
            report.outcome,
            BaselineOutcome::Failed {
                reason: FailureReason::ComplianceExceeded { .. }
            }
        ));
        assert!(!smu.output_is_on());
    }

    #[test]
    fn cancelled_run_reports_cancelled_and_output_off() {
        let mut smu = MockSmu::new(10.0, 0.0033, 100.0);
        let abort = AbortFlag::new();
        abort.set();
        let result = BaselineExecutor::new(
            &mut smu,
            BaselineConfig::default(),
            0.0033,
            NoSettle,
        )
        .with_abort_flag(abort)
        .run();
        assert!(matches!(result, Err(PhaseError::Cancelled)));
        assert!(!smu.output_is_on());
    }

    #[test]
    fn instrument_error_forces_output_off() {
        let mut smu = MockSmu::new(10.0, 0.0033, 100.0).with_comm_failure_after(2);
        let result = BaselineExecutor::new(
            &mut smu,
            BaselineConfig::default(),
            0.0033,
            NoSettle,
        )
        .run();
        assert!(matches!(result, Err(PhaseError::Instrument(_))));
        assert!(!smu.output_is_on());
    }
}
