//! Unified CLI for the electromigration test bench.
//!
//! Subcommands map to the characterization phases:
//! - `baseline`: open-loop ramp-up; establishes calibration and the initial
//!   thermal-resistance estimate, written to `init_params.json`
//! - `staircase`: closed-loop temperature staircase to the stress
//!   temperature; writes `stress_params.json` for the stress phase

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hardware::{SmuArgs, Smu2450};
use isotherm::{
    BaselineConfig, BaselineExecutor, BaselineOutcome, CycleLog, FailureThreshold, RealTimeSettle,
    SessionStorage, StaircaseConfig, StaircaseController, StaircaseExecutor, StaircaseOutcome,
    TcrTable,
};
use tracing::info;

/// Electromigration test bench control tool
#[derive(Parser, Debug)]
#[command(name = "em_tool")]
#[command(about = "Multi-phase electromigration / self-heating characterization")]
#[command(version)]
struct Args {
    #[command(flatten)]
    smu: SmuArgs,

    /// Directory for session records (init_params.json, stress_params.json)
    #[arg(long, global = true, default_value = "bench_data")]
    data_dir: PathBuf,

    /// Directory for per-cycle CSV logs
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the baseline ramp-up phase
    Baseline {
        /// Chuck temperature in °C
        #[arg(long, default_value_t = 20.0)]
        chuck_temperature: f64,

        /// Film thickness in nm, resolved through the calibrated TCR table
        #[arg(long)]
        film_thickness: Option<u32>,

        /// Explicit TCR in K⁻¹ (overrides the table lookup)
        #[arg(long)]
        tcr: Option<f64>,

        /// Probe current for the reference measurement (A)
        #[arg(long, default_value_t = 1e-4)]
        probe_current: f64,

        /// First forcing current of the ramp (A)
        #[arg(long, default_value_t = 0.01)]
        initial_current: f64,

        /// Geometric ramp ratio (> 1)
        #[arg(long, default_value_t = 1.05)]
        current_multiplier: f64,

        /// Hard forcing-current ceiling (A)
        #[arg(long, default_value_t = 0.1)]
        compliance_current: f64,

        /// Failure-threshold multiplier applied to the expected +50 °C resistance
        #[arg(long, default_value_t = 2.0)]
        fail_multiplier: f64,

        /// Delay between ramp cycles in milliseconds
        #[arg(long, default_value_t = 0)]
        cycle_delay_ms: u64,
    },

    /// Run the closed-loop temperature staircase phase
    Staircase {
        /// Final stress temperature in °C
        #[arg(long, default_value_t = 325.0)]
        target_temp: f64,

        /// Temperature step size in °C
        #[arg(long, default_value_t = 50.0)]
        step_size: f64,

        /// Convergence band in ± °C
        #[arg(long, default_value_t = 1.0)]
        tolerance: f64,

        /// Hold at each converged step, in seconds
        #[arg(long, default_value_t = 2.0)]
        settle_secs: f64,

        /// Delay between control cycles in milliseconds
        #[arg(long, default_value_t = 100)]
        cycle_delay_ms: u64,

        /// Per-cycle bound on relative current change
        #[arg(long, default_value_t = 0.10)]
        damping: f64,

        /// Forcing current for the first cycle (A)
        #[arg(long, default_value_t = 1e-3)]
        start_current: f64,

        /// Failure-threshold multiple of the reference resistance
        #[arg(long, default_value_t = 2.0)]
        fail_multiplier: f64,

        /// Abort a step that has not converged within this many cycles
        #[arg(long)]
        max_cycles_per_step: Option<u32>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let storage = SessionStorage::with_path(&args.data_dir);

    match args.command {
        Command::Baseline {
            chuck_temperature,
            film_thickness,
            tcr,
            probe_current,
            initial_current,
            current_multiplier,
            compliance_current,
            fail_multiplier,
            cycle_delay_ms,
        } => {
            let tcr = resolve_tcr(film_thickness, tcr)?;
            let config = BaselineConfig {
                chuck_temperature,
                probe_current,
                initial_current,
                current_multiplier,
                failure: FailureThreshold::TcrMargin {
                    multiplier: fail_multiplier,
                    margin_celsius: 50.0,
                },
                compliance_current,
                cycle_delay: Duration::from_millis(cycle_delay_ms),
                ..Default::default()
            };
            let mut smu = connect(&args.smu)?;
            cmd_baseline(&mut smu, &storage, &args.log_dir, config, tcr)
        }
        Command::Staircase {
            target_temp,
            step_size,
            tolerance,
            settle_secs,
            cycle_delay_ms,
            damping,
            start_current,
            fail_multiplier,
            max_cycles_per_step,
        } => {
            let config = StaircaseConfig {
                final_target: target_temp,
                step_size,
                tolerance,
                settle_time: Duration::from_secs_f64(settle_secs),
                cycle_delay: Duration::from_millis(cycle_delay_ms),
                damping_fraction: damping,
                start_current,
                failure: FailureThreshold::AbsoluteMultiple {
                    multiplier: fail_multiplier,
                },
                max_cycles_per_step,
            };
            let mut smu = connect(&args.smu)?;
            cmd_staircase(&mut smu, &storage, &args.log_dir, config)
        }
    }
}

/// Resolve the TCR from an explicit override or the calibrated table.
fn resolve_tcr(film_thickness: Option<u32>, tcr: Option<f64>) -> Result<f64> {
    if let Some(tcr) = tcr {
        return Ok(tcr);
    }
    let Some(thickness) = film_thickness else {
        bail!("specify either --film-thickness or --tcr");
    };
    let table = TcrTable::standard();
    table.lookup(thickness).with_context(|| {
        format!(
            "calibrated thicknesses are {:?} nm",
            table.thicknesses()
        )
    })
}

fn connect(args: &SmuArgs) -> Result<Smu2450> {
    info!("Connecting to SMU at {}...", args.smu_ip);
    Ok(args.connect()?)
}

fn cmd_baseline(
    smu: &mut Smu2450,
    storage: &SessionStorage,
    log_dir: &Path,
    config: BaselineConfig,
    tcr: f64,
) -> Result<()> {
    let (mut log, log_path) = CycleLog::create_in(log_dir)?;
    info!("Cycle log: {}", log_path.display());

    let report = BaselineExecutor::new(smu, config, tcr, RealTimeSettle)
        .with_log(&mut log)
        .run()?;

    match report.outcome {
        BaselineOutcome::Converged { record } => {
            let path = storage.save_baseline(&record)?;
            info!(
                "Baseline complete in {} iterations: R_ref = {:.4} Ω, R_th = {:.2} °C/W",
                report.iterations, record.r_ref, record.r_th
            );
            info!("Record saved to {}", path.display());
            Ok(())
        }
        BaselineOutcome::Failed { reason } => {
            // Structural failure is a valid test result; the collected data
            // stands. Report it and exit nonzero so scripts notice.
            bail!(
                "structure failed during baseline after {} iterations: {reason}",
                report.iterations
            );
        }
    }
}

fn cmd_staircase(
    smu: &mut Smu2450,
    storage: &SessionStorage,
    log_dir: &Path,
    config: StaircaseConfig,
) -> Result<()> {
    let record = storage.load_baseline()?;
    let calibration = record.calibration()?;
    info!(
        "Loaded baseline: R_ref = {:.4} Ω | R_th = {:.2} °C/W | TCR = {:.6}",
        record.r_ref, record.r_th, record.tcr
    );

    let (mut log, log_path) = CycleLog::create_in(log_dir)?;
    info!("Cycle log: {}", log_path.display());

    let controller = StaircaseController::new(config, calibration, record.r_th)?;
    let outcome = StaircaseExecutor::new(smu, controller, RealTimeSettle)
        .with_log(&mut log)
        .run()?;

    match outcome {
        StaircaseOutcome::Complete {
            final_point,
            r_th,
            record,
        } => {
            let path = storage.save_stress(&record)?;
            info!(
                "Staircase complete: T = {:.1} °C, I = {:.4} A, R = {:.4} Ω, R_th = {:.2} °C/W",
                final_point.temperature, final_point.current, final_point.resistance, r_th
            );
            info!("Stress record saved to {}", path.display());
            Ok(())
        }
        StaircaseOutcome::Failed { reason } => {
            bail!("structure failed during staircase: {reason}");
        }
    }
}
