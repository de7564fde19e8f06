//! Cross-phase session records.
//!
//! Each phase writes a small JSON record that the next phase consumes. The
//! field names are the on-disk contract shared with the constant-stress phase
//! tooling; do not rename them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::{Calibration, CalibrationError};

/// File name of the record written by the baseline phase.
pub const BASELINE_FILE: &str = "init_params.json";

/// File name of the record written by the staircase phase.
pub const STRESS_FILE: &str = "stress_params.json";

/// Errors from session-record storage.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The record for the preceding phase does not exist.
    #[error("no session record at {}: run the preceding phase first", path.display())]
    MissingCalibration { path: PathBuf },

    /// The record exists but cannot be parsed.
    #[error("session record at {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handoff record from the baseline phase to the staircase phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    /// Reference resistance at chuck temperature (Ω).
    pub r_ref: f64,
    /// Initial thermal-resistance estimate (°C/W).
    pub r_th: f64,
    /// Temperature coefficient of resistance (K⁻¹).
    pub tcr: f64,
    /// Chuck temperature (°C).
    pub t_chuck: f64,
}

impl BaselineRecord {
    /// Rebuild the calibration carried by this record.
    pub fn calibration(&self) -> Result<Calibration, CalibrationError> {
        Calibration::new(self.r_ref, self.t_chuck, self.tcr)
    }
}

/// Handoff record from the staircase phase to the constant-stress phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressRecord {
    /// Stress temperature the staircase converged to (°C).
    pub target_temp: f64,
    /// Forcing current holding the line at the stress temperature (A).
    pub start_current: f64,
    /// Dissipated power at the stress point (W).
    pub target_power: f64,
    /// Line resistance at the start of stress (Ω).
    pub final_r: f64,
    /// Reference resistance (Ω).
    pub r_ref: f64,
    /// Temperature coefficient of resistance (K⁻¹).
    pub tcr: f64,
    /// Chuck temperature (°C).
    pub t_chuck: f64,
}

/// Directory-based storage for session records.
#[derive(Debug, Clone)]
pub struct SessionStorage {
    root: PathBuf,
}

impl SessionStorage {
    /// Storage rooted at the given directory.
    pub fn with_path<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the baseline record.
    pub fn baseline_path(&self) -> PathBuf {
        self.root.join(BASELINE_FILE)
    }

    /// Path of the stress record.
    pub fn stress_path(&self) -> PathBuf {
        self.root.join(STRESS_FILE)
    }

    /// Write the baseline record, creating the directory if needed.
    ///
    /// Returns the path the record was written to.
    pub fn save_baseline(&self, record: &BaselineRecord) -> Result<PathBuf, SessionError> {
        self.save(self.baseline_path(), record)
    }

    /// Read the baseline record written by a prior run.
    pub fn load_baseline(&self) -> Result<BaselineRecord, SessionError> {
        self.load(self.baseline_path())
    }

    /// Write the stress record, creating the directory if needed.
    pub fn save_stress(&self, record: &StressRecord) -> Result<PathBuf, SessionError> {
        self.save(self.stress_path(), record)
    }

    /// Read the stress record written by a prior run.
    pub fn load_stress(&self) -> Result<StressRecord, SessionError> {
        self.load(self.stress_path())
    }

    fn save<T: Serialize>(&self, path: PathBuf, record: &T) -> Result<PathBuf, SessionError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(record).map_err(|source| SessionError::Corrupt {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json)?;
        Ok(path)
    }

    fn load<T: for<'de> Deserialize<'de>>(&self, path: PathBuf) -> Result<T, SessionError> {
        if !path.exists() {
            return Err(SessionError::MissingCalibration { path });
        }
        let contents = fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|source| SessionError::Corrupt { path, source })
    }
}
