//! End-to-end baseline phase against the simulated line model.

use isotherm::mock::MockSmu;
use isotherm::{
    BaselineConfig, BaselineExecutor, BaselineOutcome, FailureReason, FailureThreshold, NoSettle,
    SessionStorage,
};

const TCR: f64 = 0.0033;

fn executor_config() -> BaselineConfig {
    BaselineConfig {
        chuck_temperature: 20.0,
        initial_current: 0.01,
        current_multiplier: 1.05,
        compliance_current: 2.0,
        ..Default::default()
    }
}

#[test]
fn ramp_converges_on_compliant_line() {
    // Scenario from the bench procedure: R_chuck = 10 Ω, TCR = 0.0033,
    // T_chuck = 20 °C, I₁ = 0.01 A, f = 1.05. The ramp must end either at
    // T >= 70 °C with iteration >= 5, or at the 21.65 Ω failure threshold.
    let mut smu = MockSmu::new(10.0, TCR, 100.0);
    let report = BaselineExecutor::new(&mut smu, executor_config(), TCR, NoSettle)
        .run()
        .unwrap();

    let record = match report.outcome {
        BaselineOutcome::Converged { record } => record,
        other => panic!("expected convergence, got {other:?}"),
    };

    assert!(report.iterations >= 5);
    let last = report.history.last().unwrap();
    assert!(last.temperature >= 70.0);
    // Convergence happened before the failure threshold.
    assert!(last.resistance < 21.65);

    // The calibration reflects the probe measurement.
    assert!((report.calibration.reference_resistance - 10.0).abs() < 1e-3);
    assert_eq!(record.t_chuck, 20.0);
    assert_eq!(record.tcr, TCR);

    // On the ideal line the derived R_th recovers the model's value.
    assert!(
        (record.r_th - 100.0).abs() / 100.0 < 0.05,
        "derived R_th {} too far from 100",
        record.r_th
    );

    // The actuator never stays energized after a phase.
    assert!(!smu.output_is_on());
}

#[test]
fn forcing_currents_grow_geometrically() {
    let mut smu = MockSmu::new(10.0, TCR, 100.0);
    BaselineExecutor::new(&mut smu, executor_config(), TCR, NoSettle)
        .run()
        .unwrap();

    // Skip the probe measurement; every ramp command is the previous × 1.05.
    let ramp = &smu.commanded_currents()[1..];
    for pair in ramp.windows(2) {
        let ratio = pair[1] / pair[0];
        assert!((ratio - 1.05).abs() < 1e-9, "ratio {ratio}");
    }
}

#[test]
fn open_circuit_terminates_with_failure() {
    let mut smu = MockSmu::new(10.0, TCR, 100.0).with_open_circuit_after(4);
    let report = BaselineExecutor::new(&mut smu, executor_config(), TCR, NoSettle)
        .run()
        .unwrap();

    match report.outcome {
        BaselineOutcome::Failed {
            reason: FailureReason::ResistanceLimit { measured, limit },
        } => {
            assert!(measured >= limit);
            // 2 × 10 × (1 + 0.0033 × 50) = 21.65 Ω
            assert!((limit - 21.65).abs() < 1e-6);
        }
        other => panic!("expected resistance failure, got {other:?}"),
    }

    // Failure stops the ramp immediately: 1 probe + 3 good + 1 failed read.
    assert_eq!(smu.measurement_count(), 5);
    assert!(!smu.output_is_on());

    // Data collected before the failure is retained and valid.
    assert_eq!(report.history.len(), 3);
}

#[test]
fn converged_record_round_trips_to_staircase_input() {
    let mut smu = MockSmu::new(10.0, TCR, 100.0);
    let report = BaselineExecutor::new(&mut smu, executor_config(), TCR, NoSettle)
        .run()
        .unwrap();
    let record = match report.outcome {
        BaselineOutcome::Converged { record } => record,
        other => panic!("expected convergence, got {other:?}"),
    };

    let dir = std::env::temp_dir().join(format!(
        "isotherm_handoff_test_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let storage = SessionStorage::with_path(&dir);
    storage.save_baseline(&record).unwrap();

    let loaded = storage.load_baseline().unwrap();
    assert_eq!(loaded, record);
    let calibration = loaded.calibration().unwrap();
    assert_eq!(
        calibration.reference_resistance,
        report.calibration.reference_resistance
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn tighter_baseline_threshold_variant_trips_at_the_boundary() {
    // The k=1 threshold variant (1 × R_ref × (1 + TCR·50) = 11.65 Ω) sits at
    // exactly the +50 °C resistance, so an ideal ramp hits the threshold at
    // the same moment it reaches the rise target. The failure check runs
    // first, so this variant reports a structural failure at the boundary.
    let mut smu = MockSmu::new(10.0, TCR, 100.0);
    let config = BaselineConfig {
        failure: FailureThreshold::TcrMargin {
            multiplier: 1.0,
            margin_celsius: 50.0,
        },
        ..executor_config()
    };
    let report = BaselineExecutor::new(&mut smu, config, TCR, NoSettle)
        .run()
        .unwrap();

    match report.outcome {
        BaselineOutcome::Failed {
            reason: FailureReason::ResistanceLimit { limit, .. },
        } => assert!((limit - 11.65).abs() < 1e-9),
        BaselineOutcome::Converged { .. } => {
            // Acceptable only if the last point stayed strictly inside the band.
            let last = report.history.last().unwrap();
            assert!(last.resistance < 11.65);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
