//! Keithley 2450 SourceMeter driver.
//!
//! Configures the instrument as a DC current source with voltage-compliance
//! limiting and 2-wire or 4-wire sense, and exposes the single operation the
//! test procedures need: force a current, read back voltage, derive
//! resistance.
//!
//! # Safety
//!
//! The 2450 keeps sourcing current until told otherwise. The driver therefore
//! forces the output off when dropped (unless explicitly disabled), so that no
//! error path in a calling procedure can leave current flowing through the
//! device under test.

use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use super::tsp::{TspDevice, TspResult, DEFAULT_TSP_PORT};
use crate::{Measurement, SmuError, SourceMeter};

/// Sense-terminal configuration for resistance measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SenseMode {
    /// 2-wire (local) sense. Lead resistance is included in the reading.
    TwoWire,
    /// 4-wire (remote/Kelvin) sense.
    FourWire,
}

impl SenseMode {
    fn tsp_constant(&self) -> &'static str {
        match self {
            SenseMode::TwoWire => "smu.SENSE_2WIRE",
            SenseMode::FourWire => "smu.SENSE_4WIRE",
        }
    }
}

/// High-level driver for the Keithley 2450 SourceMeter.
pub struct Smu2450 {
    device: TspDevice,
    output_on: bool,
    output_off_on_drop: bool,
}

impl Smu2450 {
    /// Connect at the given IP using the default TSP port (5025).
    ///
    /// Resets the instrument and logs its identification string.
    pub fn connect_ip(ip: &str) -> TspResult<Self> {
        Self::connect(ip, DEFAULT_TSP_PORT)
    }

    /// Connect at the given IP and port.
    pub fn connect(ip: &str, port: u16) -> TspResult<Self> {
        let mut device = TspDevice::connect(format!("{ip}:{port}"))?;
        let idn = device.query("*IDN?")?;
        info!("Connected to: {}", idn.trim());
        device.write("reset()")?;
        Ok(Self {
            device,
            output_on: false,
            output_off_on_drop: true,
        })
    }

    /// Set the I/O timeout for instrument operations.
    pub fn set_timeout(&mut self, timeout: Duration) -> TspResult<()> {
        self.device.set_timeout(timeout)
    }

    /// Set whether the source output is forced off when the driver is dropped.
    ///
    /// Default is `true`. Disable only when a subsequent phase deliberately
    /// takes over a still-energized output.
    pub fn set_output_off_on_drop(&mut self, off_on_drop: bool) {
        self.output_off_on_drop = off_on_drop;
    }

    /// Get mutable access to the underlying TSP transport.
    ///
    /// Use this for raw commands not exposed by the driver API.
    pub fn device_mut(&mut self) -> &mut TspDevice {
        &mut self.device
    }

    /// Configure the instrument as a DC current source measuring voltage.
    ///
    /// `voltage_limit` is the source compliance limit in volts; the
    /// instrument clamps its output so the voltage across the device under
    /// test never exceeds it.
    pub fn configure_current_source(
        &mut self,
        sense: SenseMode,
        voltage_limit: f64,
    ) -> TspResult<()> {
        self.device.write("smu.source.func = smu.FUNC_DC_CURRENT")?;
        self.device
            .write("smu.measure.func = smu.FUNC_DC_VOLTAGE")?;
        self.device
            .write(&format!("smu.measure.sense = {}", sense.tsp_constant()))?;
        self.device
            .write(&format!("smu.source.vlimit.level = {voltage_limit}"))?;
        info!(
            "2450 configured: DC current source, {:?} sense, vlimit {voltage_limit} V",
            sense
        );
        Ok(())
    }

    /// Set the source current level without touching the output state.
    pub fn set_current(&mut self, amps: f64) -> TspResult<()> {
        self.device.write(&format!("smu.source.level = {amps}"))?;
        Ok(())
    }

    /// Turn the source output on.
    pub fn output_on(&mut self) -> TspResult<()> {
        self.device.write("smu.source.output = smu.ON")?;
        self.output_on = true;
        Ok(())
    }

    /// Turn the source output off.
    pub fn output_off(&mut self) -> TspResult<()> {
        self.device.write("smu.source.output = smu.OFF")?;
        self.output_on = false;
        Ok(())
    }

    /// Trigger one reading and return the measured voltage in volts.
    pub fn read_voltage(&mut self) -> TspResult<f64> {
        self.device.query_value("smu.measure.read()")
    }
}

impl SourceMeter for Smu2450 {
    fn measure(&mut self, forcing_current: f64) -> Result<Measurement, SmuError> {
        if !forcing_current.is_finite() || forcing_current <= 0.0 {
            return Err(SmuError::SourceLevel {
                requested: forcing_current,
                reason: "forcing current must be finite and positive".to_string(),
            });
        }

        self.set_current(forcing_current)
            .map_err(|e| SmuError::Communication(e.to_string()))?;
        if !self.output_on {
            self.output_on()
                .map_err(|e| SmuError::Communication(e.to_string()))?;
        }

        let voltage = self
            .read_voltage()
            .map_err(|e| SmuError::Communication(e.to_string()))?;
        if !voltage.is_finite() {
            return Err(SmuError::InvalidReading(format!(
                "non-finite voltage reading: {voltage}"
            )));
        }

        Ok(Measurement {
            voltage,
            current: forcing_current,
            resistance: voltage / forcing_current,
        })
    }

    fn output_off(&mut self) -> Result<(), SmuError> {
        Smu2450::output_off(self).map_err(|e| SmuError::Communication(e.to_string()))
    }
}

impl Drop for Smu2450 {
    fn drop(&mut self) {
        if self.output_off_on_drop && self.output_on {
            if let Err(e) = Smu2450::output_off(self) {
                warn!("Failed to force 2450 output off on drop: {e}");
            }
        }
    }
}

/// Command-line arguments for SMU connection.
///
/// Use with `#[command(flatten)]` in a CLI args struct.
#[derive(Args, Debug, Clone)]
pub struct SmuArgs {
    /// Keithley 2450 IP address.
    #[arg(long, help = "Keithley 2450 SourceMeter IP address")]
    pub smu_ip: String,

    /// TSP raw-socket port.
    #[arg(long, default_value_t = DEFAULT_TSP_PORT)]
    pub smu_port: u16,

    /// Sense-terminal configuration.
    #[arg(long, value_enum, default_value_t = SenseMode::FourWire)]
    pub sense: SenseMode,

    /// Source voltage compliance limit in volts.
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Voltage compliance limit (V)",
        long_help = "Maximum voltage the source may develop across the device under \
            test. The instrument clamps its output at this level independently of \
            the control loop."
    )]
    pub voltage_limit: f64,

    /// Force the source output off on program exit.
    #[arg(
        long,
        default_value_t = true,
        help = "Force SMU output off on program exit",
        long_help = "When true (default), the source output is forced off when the \
            driver is dropped. Set to false only when a follow-on phase takes over \
            a still-energized output."
    )]
    pub smu_shutdown_on_exit: bool,
}

impl SmuArgs {
    /// Connect and configure the SMU from these arguments.
    pub fn connect(&self) -> Result<Smu2450, SmuError> {
        let mut smu = Smu2450::connect(&self.smu_ip, self.smu_port).map_err(|e| {
            SmuError::Communication(format!("failed to connect to {}: {e}", self.smu_ip))
        })?;
        smu.configure_current_source(self.sense, self.voltage_limit)
            .map_err(|e| SmuError::Communication(e.to_string()))?;
        if !self.smu_shutdown_on_exit {
            smu.set_output_off_on_drop(false);
        }
        Ok(smu)
    }
}
