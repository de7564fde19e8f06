//! Temperature staircase phase (closed loop).
//!
//! Ramps the line through a sequence of increasing temperature setpoints to
//! the final stress temperature. Within each step an inner loop infers the
//! junction temperature from resistance, refines the thermal-resistance
//! estimate at every convergence, and computes the next forcing current from
//! the required power: a one-step model-based predictive update rather than
//! an accumulating integrator. Per-cycle damping bounds the command change
//! because the predictive formula is exact only when the thermal-resistance
//! estimate is, and early in the run it is not.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::Calibration;
use crate::cycle_log::CycleLog;
use crate::error::PhaseError;
use crate::failure::{FailureReason, FailureThreshold};
use crate::point::OperatingPoint;
use crate::session::StressRecord;
use crate::settle::SettlePolicy;
use crate::thermal::ThermalResistance;
use crate::AbortFlag;
use hardware::{Measurement, SourceMeter};

/// Configuration for the staircase phase.
#[derive(Debug, Clone)]
pub struct StaircaseConfig {
    /// Final stress temperature (°C).
    pub final_target: f64,
    /// Temperature step between setpoints (°C).
    pub step_size: f64,
    /// Convergence band around each setpoint (± °C).
    pub tolerance: f64,
    /// Hold after each step converges, for thermal equilibrium.
    pub settle_time: Duration,
    /// Delay between control cycles within a step.
    pub cycle_delay: Duration,
    /// Per-cycle bound on relative current change (0.10 = ±10 %).
    pub damping_fraction: f64,
    /// Forcing current for the first cycle (A).
    pub start_current: f64,
    /// Structural-failure threshold policy for this phase.
    pub failure: FailureThreshold,
    /// Abort a step that has not converged within this many cycles.
    /// `None` leaves the inner loop unbounded.
    pub max_cycles_per_step: Option<u32>,
}

impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            final_target: 325.0,
            step_size: 50.0,
            tolerance: 1.0,
            settle_time: Duration::from_secs(2),
            cycle_delay: Duration::from_millis(100),
            damping_fraction: 0.10,
            start_current: 1e-3,
            failure: FailureThreshold::AbsoluteMultiple { multiplier: 2.0 },
            max_cycles_per_step: None,
        }
    }
}

/// Staircase controller states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaircaseState {
    /// Driving the line toward the current step target.
    RampingToStep { target: f64, cycles: u32 },
    /// The current step converged; holding for thermal equilibrium.
    StepConverged { target: f64 },
    /// Terminal success: the final target converged.
    AllStepsComplete,
    /// Terminal failure: the actuator must be off.
    Failed { reason: FailureReason },
}

/// What the executor must do after a control cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    /// Apply the new forcing current and measure again after the cycle delay.
    Continue { next_current: f64 },
    /// The step converged: hold for the settle time, then advance.
    HoldAtStep { target: f64 },
    /// Terminal failure: force the output off; issue no further commands.
    Abort { reason: FailureReason },
}

/// The closed-loop isothermal controller.
///
/// Pure control law: ingests one measurement per cycle and returns the action
/// to take. All instrument and wall-clock effects live in
/// [`StaircaseExecutor`], which keeps this logic testable cycle by cycle.
pub struct StaircaseController {
    config: StaircaseConfig,
    calibration: Calibration,
    r_th: ThermalResistance,
    state: StaircaseState,
    current: f64,
    last_point: Option<OperatingPoint>,
}

impl StaircaseController {
    /// Create a controller from a validated configuration.
    pub fn new(
        config: StaircaseConfig,
        calibration: Calibration,
        initial_r_th: f64,
    ) -> Result<Self, PhaseError> {
        if !(config.final_target > calibration.chuck_temperature) {
            return Err(PhaseError::InvalidConfig(format!(
                "final target {} °C must exceed the chuck temperature {} °C",
                config.final_target, calibration.chuck_temperature
            )));
        }
        if !(config.step_size > 0.0) {
            return Err(PhaseError::InvalidConfig(format!(
                "step size must be positive, got {}",
                config.step_size
            )));
        }
        if !(config.tolerance > 0.0) {
            return Err(PhaseError::InvalidConfig(format!(
                "temperature tolerance must be positive, got {}",
                config.tolerance
            )));
        }
        if !(config.damping_fraction > 0.0 && config.damping_fraction < 1.0) {
            return Err(PhaseError::InvalidConfig(format!(
                "damping fraction must be in (0, 1), got {}",
                config.damping_fraction
            )));
        }
        if !(config.start_current > 0.0) {
            return Err(PhaseError::InvalidConfig(format!(
                "start current must be positive, got {}",
                config.start_current
            )));
        }
        if !(initial_r_th > 0.0) || !initial_r_th.is_finite() {
            return Err(PhaseError::InvalidConfig(format!(
                "initial thermal resistance must be finite and positive, got {initial_r_th}"
            )));
        }

        let first_target =
            (calibration.chuck_temperature + config.step_size).min(config.final_target);
        let current = config.start_current;
        Ok(Self {
            config,
            calibration,
            r_th: ThermalResistance::new(initial_r_th),
            state: StaircaseState::RampingToStep {
                target: first_target,
                cycles: 0,
            },
            current,
            last_point: None,
        })
    }

    /// Current controller state.
    pub fn state(&self) -> &StaircaseState {
        &self.state
    }

    /// The forcing current the next measurement should be taken at.
    pub fn commanded_current(&self) -> f64 {
        self.current
    }

    /// The running thermal-resistance estimate.
    pub fn thermal_resistance(&self) -> &ThermalResistance {
        &self.r_th
    }

    /// The most recent operating point, if any measurement has been ingested.
    pub fn last_point(&self) -> Option<OperatingPoint> {
        self.last_point
    }

    /// The active step target, when ramping or holding.
    pub fn target(&self) -> Option<f64> {
        match self.state {
            StaircaseState::RampingToStep { target, .. }
            | StaircaseState::StepConverged { target } => Some(target),
            _ => None,
        }
    }

    /// Ingest one measurement and decide the next action.
    pub fn process_measurement(&mut self, measurement: &Measurement) -> CycleAction {
        let point = OperatingPoint::from_measurement(measurement, &self.calibration);
        self.last_point = Some(point);

        match self.state.clone() {
            StaircaseState::RampingToStep { target, cycles } => {
                self.ramping_cycle(point, target, cycles)
            }
            StaircaseState::StepConverged { target } => {
                warn!("Measurement ingested while holding at {target:.1} °C");
                CycleAction::HoldAtStep { target }
            }
            StaircaseState::AllStepsComplete => {
                warn!("Measurement ingested after staircase completion");
                CycleAction::HoldAtStep {
                    target: self.config.final_target,
                }
            }
            StaircaseState::Failed { reason } => {
                warn!("Measurement ingested after failure");
                CycleAction::Abort { reason }
            }
        }
    }

    fn ramping_cycle(&mut self, point: OperatingPoint, target: f64, cycles: u32) -> CycleAction {
        // Safety before anything else: a resistance excursion past the
        // threshold is fatal for the whole run, not a retryable condition.
        let limit = self.config.failure.limit(&self.calibration);
        if point.resistance >= limit {
            let reason = FailureReason::ResistanceLimit {
                measured: point.resistance,
                limit,
            };
            warn!("Structural failure at {:.1} °C step: {reason}", target);
            self.state = StaircaseState::Failed {
                reason: reason.clone(),
            };
            return CycleAction::Abort { reason };
        }

        if (point.temperature - target).abs() < self.config.tolerance {
            // Step reached. Refine R_th from this confirmed operating point;
            // the estimate is temperature-dependent, so each step's refinement
            // improves the prediction for the next.
            let refined = self
                .r_th
                .refine(point.delta_t(&self.calibration), point.power);
            info!(
                "Step {target:.1} °C reached (T = {:.1} °C); R_th {} {:.2} °C/W",
                point.temperature,
                if refined { "updated to" } else { "held at" },
                self.r_th.celsius_per_watt()
            );
            self.state = StaircaseState::StepConverged { target };
            return CycleAction::HoldAtStep { target };
        }

        // Predictive update: full recomputation from current physics, not an
        // accumulated error term.
        let p_required = self
            .r_th
            .required_power(target - self.calibration.chuck_temperature);
        let predicted = (p_required / point.resistance).sqrt();

        // Damp to ±damping_fraction per cycle to prevent oscillation while
        // the thermal-resistance estimate is still rough.
        let lo = self.current * (1.0 - self.config.damping_fraction);
        let hi = self.current * (1.0 + self.config.damping_fraction);
        let next = predicted.clamp(lo, hi);

        self.current = next;
        self.state = StaircaseState::RampingToStep {
            target,
            cycles: cycles + 1,
        };
        CycleAction::Continue { next_current: next }
    }

    /// Advance past a converged step after the equilibrium hold.
    ///
    /// Returns the final operating point once the last step has converged,
    /// `None` while more steps remain.
    pub fn advance_step(&mut self) -> Option<OperatingPoint> {
        match self.state.clone() {
            StaircaseState::StepConverged { target } => {
                if target >= self.config.final_target {
                    info!("Final step converged; staircase complete");
                    self.state = StaircaseState::AllStepsComplete;
                    self.last_point
                } else {
                    let next = (target + self.config.step_size).min(self.config.final_target);
                    info!(">> Ramping to step: {next:.1} °C");
                    self.state = StaircaseState::RampingToStep {
                        target: next,
                        cycles: 0,
                    };
                    None
                }
            }
            StaircaseState::AllStepsComplete => self.last_point,
            _ => None,
        }
    }

    /// Build the stress-phase handoff record from the final operating point.
    fn stress_record(&self, final_point: &OperatingPoint) -> StressRecord {
        StressRecord {
            target_temp: self.config.final_target,
            start_current: final_point.current,
            target_power: final_point.power,
            final_r: final_point.resistance,
            r_ref: self.calibration.reference_resistance,
            tcr: self.calibration.tcr,
            t_chuck: self.calibration.chuck_temperature,
        }
    }
}

/// Terminal result of the staircase phase.
#[derive(Debug, Clone, PartialEq)]
pub enum StaircaseOutcome {
    /// All steps converged; handoff record ready for the stress phase.
    Complete {
        final_point: OperatingPoint,
        r_th: f64,
        record: StressRecord,
    },
    /// The structure failed during the ramp. Data collected so far is valid.
    Failed { reason: FailureReason },
}

/// Executor for the staircase phase.
///
/// Exclusively owns the instrument for the duration of the run, applies
/// settle delays through the [`SettlePolicy`], checks cancellation at each
/// cycle boundary, and forces the output off on every exit path.
pub struct StaircaseExecutor<'a, S: SourceMeter, P: SettlePolicy> {
    smu: &'a mut S,
    controller: StaircaseController,
    settle: P,
    log: Option<&'a mut CycleLog>,
    abort: Option<AbortFlag>,
}

impl<'a, S: SourceMeter, P: SettlePolicy> StaircaseExecutor<'a, S, P> {
    /// Create an executor around a controller.
    pub fn new(smu: &'a mut S, controller: StaircaseController, settle: P) -> Self {
        Self {
            smu,
            controller,
            settle,
            log: None,
            abort: None,
        }
    }

    /// Attach a cycle log; one row is appended per measurement.
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
    pub fn run(mut self) -> Result<StaircaseOutcome, PhaseError> {
        let result = self.run_inner();
        if let Err(off_err) = self.smu.output_off() {
            warn!("Failed to force output off after staircase phase: {off_err}");
            if result.is_ok() {
                return Err(PhaseError::Instrument(off_err));
            }
        }
        result
    }

    fn run_inner(&mut self) -> Result<StaircaseOutcome, PhaseError> {
        let calibration = self.controller.calibration;
        let mut iteration = 0u32;

        loop {
            if let Some(flag) = &self.abort {
                if flag.is_set() {
                    return Err(PhaseError::Cancelled);
                }
            }

            let m = self.smu.measure(self.controller.commanded_current())?;
            iteration += 1;
            let action = self.controller.process_measurement(&m);

            if let Some(point) = self.controller.last_point() {
                if let Some(log) = self.log.as_deref_mut() {
                    log.record(iteration, &point, &calibration)?;
                }
                info!(
                    "Meas: T = {:.1} °C | R = {:.4} Ω | P = {:.1} mW",
                    point.temperature,
                    point.resistance,
                    point.power * 1000.0
                );
            }

            match action {
                CycleAction::Continue { .. } => {
                    if let (Some(max), StaircaseState::RampingToStep { target, cycles }) = (
                        self.controller.config.max_cycles_per_step,
                        self.controller.state().clone(),
                    ) {
                        if cycles >= max {
                            return Err(PhaseError::StepTimeout { target, cycles });
                        }
                    }
                    self.settle.settle(self.controller.config.cycle_delay);
                }
                CycleAction::HoldAtStep { .. } => {
                    self.settle.settle(self.controller.config.settle_time);
                    if let Some(final_point) = self.controller.advance_step() {
                        let record = self.controller.stress_record(&final_point);
                        return Ok(StaircaseOutcome::Complete {
                            final_point,
                            r_th: self.controller.thermal_resistance().celsius_per_watt(),
                            record,
                        });
                    }
                }
                CycleAction::Abort { reason } => {
                    return Ok(StaircaseOutcome::Failed { reason });
                }
            }
        }
    }
}
