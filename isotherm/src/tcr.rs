//! Temperature-coefficient-of-resistance lookup for the thin-film process.

use thiserror::Error;

/// Error type for TCR lookups.
#[derive(Debug, Error)]
pub enum TcrError {
    /// The requested film thickness has no calibrated table entry.
    #[error("film thickness {thickness_nm} nm is not in the calibrated TCR table")]
    UnknownThickness { thickness_nm: u32 },
}

/// Calibrated TCR table indexed by film thickness.
///
/// Entries are discrete: the table does not interpolate, since the TCR is
/// characterized per deposited thickness and intermediate thicknesses are not
/// manufactured.
#[derive(Debug, Clone)]
pub struct TcrTable {
    /// (thickness nm, TCR K⁻¹), sorted by thickness.
    entries: Vec<(u32, f64)>,
}

impl TcrTable {
    /// The standard table for the bench's thin-film process.
    pub fn standard() -> Self {
        Self {
            entries: vec![
                (20, 0.00307),
                (40, 0.00323),
                (60, 0.00325),
                (85, 0.00327),
                (100, 0.00329),
                (200, 0.00336),
            ],
        }
    }

    /// Build a table from explicit (thickness nm, TCR) pairs.
    pub fn from_entries(mut entries: Vec<(u32, f64)>) -> Self {
        entries.sort_by_key(|&(thickness, _)| thickness);
        Self { entries }
    }

    /// Look up the TCR for a film thickness.
    pub fn lookup(&self, thickness_nm: u32) -> Result<f64, TcrError> {
        self.entries
            .iter()
            .find(|&&(thickness, _)| thickness == thickness_nm)
            .map(|&(_, tcr)| tcr)
            .ok_or(TcrError::UnknownThickness { thickness_nm })
    }

    /// The calibrated thicknesses, ascending.
    pub fn thicknesses(&self) -> Vec<u32> {
        self.entries.iter().map(|&(thickness, _)| thickness).collect()
    }
}
