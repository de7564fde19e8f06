//! End-to-end staircase runs against the simulated line model.

use isotherm::mock::MockSmu;
use isotherm::{
    Calibration, FailureReason, NoSettle, StaircaseConfig, StaircaseController,
    StaircaseExecutor, StaircaseOutcome,
};

const R_REF: f64 = 10.0;
const TCR: f64 = 0.0033;
const R_TH: f64 = 100.0;

fn calibration() -> Calibration {
    Calibration::new(R_REF, 20.0, TCR).unwrap()
}

fn config(final_target: f64) -> StaircaseConfig {
    StaircaseConfig {
        final_target,
        // A bound well above what the ideal model needs; turns a regression
        // into a test failure instead of a hang.
        max_cycles_per_step: Some(2000),
        ..Default::default()
    }
}

fn run_to_outcome(
    smu: &mut MockSmu,
    config: StaircaseConfig,
    initial_r_th: f64,
) -> StaircaseOutcome {
    let controller = StaircaseController::new(config, calibration(), initial_r_th).unwrap();
    StaircaseExecutor::new(smu, controller, NoSettle)
        .run()
        .unwrap()
}

#[test]
fn staircase_converges_to_final_target() {
    let mut smu = MockSmu::new(R_REF, TCR, R_TH);
    let outcome = run_to_outcome(&mut smu, config(120.0), R_TH);

    let (final_point, r_th, record) = match outcome {
        StaircaseOutcome::Complete {
            final_point,
            r_th,
            record,
        } => (final_point, r_th, record),
        other => panic!("expected completion, got {other:?}"),
    };

    // Converged within the tolerance band of the final target.
    assert!(
        (final_point.temperature - 120.0).abs() < 1.0,
        "final T = {}",
        final_point.temperature
    );
    // The refined estimate recovers the model's thermal resistance.
    assert!((r_th - R_TH).abs() / R_TH < 0.02, "refined R_th = {r_th}");

    // Handoff record describes the final operating point.
    assert_eq!(record.target_temp, 120.0);
    assert_eq!(record.final_r, final_point.resistance);
    assert_eq!(record.start_current, final_point.current);
    assert!((record.target_power - final_point.power).abs() < 1e-12);
    assert_eq!(record.r_ref, R_REF);
    assert_eq!(record.tcr, TCR);
    assert_eq!(record.t_chuck, 20.0);

    // Output forced off at the end of the phase.
    assert!(!smu.output_is_on());
}

#[test]
fn convergence_is_bounded_with_imperfect_initial_estimate() {
    // The commanded power settles at ΔT_target × (R_th_true / R_th_est), so
    // the first step only converges when the initial estimate puts that
    // settling point inside the tolerance band; afterwards the refinement
    // makes the estimate exact. Start 1.5 % high and require a bounded run.
    let mut smu = MockSmu::new(R_REF, TCR, R_TH);
    let outcome = run_to_outcome(&mut smu, config(120.0), 1.015 * R_TH);

    assert!(matches!(outcome, StaircaseOutcome::Complete { .. }));
    assert!(
        smu.measurement_count() < 1000,
        "took {} cycles",
        smu.measurement_count()
    );
}

#[test]
fn consecutive_commands_respect_damping_bound() {
    let mut smu = MockSmu::new(R_REF, TCR, R_TH);
    let outcome = run_to_outcome(&mut smu, config(170.0), R_TH);
    assert!(matches!(outcome, StaircaseOutcome::Complete { .. }));

    for pair in smu.commanded_currents().windows(2) {
        let ratio = pair[1] / pair[0];
        assert!(
            (0.9 - 1e-9..=1.1 + 1e-9).contains(&ratio),
            "command ratio {ratio} outside damping band"
        );
    }
}

#[test]
fn final_target_not_a_step_multiple() {
    // 20 °C chuck, 50 °C steps, final 135 °C: the last step is shorter and
    // the run must still end exactly at the final target's band.
    let mut smu = MockSmu::new(R_REF, TCR, R_TH);
    let outcome = run_to_outcome(&mut smu, config(135.0), R_TH);

    match outcome {
        StaircaseOutcome::Complete { final_point, .. } => {
            assert!((final_point.temperature - 135.0).abs() < 1.0);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[test]
fn open_circuit_aborts_run_with_no_further_commands() {
    let mut smu = MockSmu::new(R_REF, TCR, R_TH).with_open_circuit_after(10);
    let outcome = run_to_outcome(&mut smu, config(120.0), R_TH);

    match outcome {
        StaircaseOutcome::Failed {
            reason: FailureReason::ResistanceLimit { measured, limit },
        } => {
            assert!(measured >= limit);
            assert!((limit - 2.0 * R_REF).abs() < 1e-12);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // The failing read is the last command ever issued.
    assert_eq!(smu.measurement_count(), 11);
    assert!(!smu.output_is_on());
}

#[test]
fn instrument_dropout_is_fatal_and_output_is_off() {
    let mut smu = MockSmu::new(R_REF, TCR, R_TH).with_comm_failure_after(5);
    let controller = StaircaseController::new(config(120.0), calibration(), R_TH).unwrap();
    let result = StaircaseExecutor::new(&mut smu, controller, NoSettle).run();

    assert!(result.is_err());
    assert!(!smu.output_is_on());
}

#[test]
fn cancellation_stops_the_loop_and_forces_output_off() {
    use isotherm::AbortFlag;

    let mut smu = MockSmu::new(R_REF, TCR, R_TH);
    let abort = AbortFlag::new();
    abort.set();

    let controller = StaircaseController::new(config(120.0), calibration(), R_TH).unwrap();
    let result = StaircaseExecutor::new(&mut smu, controller, NoSettle)
        .with_abort_flag(abort)
        .run();

    assert!(matches!(result, Err(isotherm::PhaseError::Cancelled)));
    assert_eq!(smu.measurement_count(), 0);
    assert!(!smu.output_is_on());
}

#[test]
fn step_timeout_aborts_unconvergeable_step() {
    // A line that barely heats can never reach the step target; the cycle
    // budget must end the run instead of looping forever.
    let mut smu = MockSmu::new(R_REF, TCR, 0.01);
    let controller = StaircaseController::new(
        StaircaseConfig {
            final_target: 120.0,
            max_cycles_per_step: Some(50),
            ..Default::default()
        },
        calibration(),
        // Deliberately wrong initial estimate so the controller keeps trying.
        100.0,
    )
    .unwrap();
    let result = StaircaseExecutor::new(&mut smu, controller, NoSettle).run();

    match result {
        Err(isotherm::PhaseError::StepTimeout { target, cycles }) => {
            assert_eq!(target, 70.0);
            assert_eq!(cycles, 50);
        }
        other => panic!("expected StepTimeout, got {other:?}"),
    }
    assert!(!smu.output_is_on());
}
