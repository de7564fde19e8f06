//! Per-cycle CSV log.
//!
//! One row per measurement cycle, append-only, matching the column layout the
//! bench's analysis notebooks expect.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;

use crate::calibration::Calibration;
use crate::point::OperatingPoint;

const HEADER: &str = "date,elapsed,iteration,current_ma,resistance_ohm,delta_t_c";

/// Append-only CSV log of measurement cycles.
pub struct CycleLog {
    writer: BufWriter<File>,
    start: Instant,
}

impl CycleLog {
    /// Create a log at the given path and write the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{HEADER}")?;
        Ok(Self {
            writer,
            start: Instant::now(),
        })
    }

    /// Create a session-stamped log file (`log_<start>.csv`) in a directory,
    /// creating the directory if needed. Returns the log and its path.
    pub fn create_in<P: AsRef<Path>>(dir: P) -> io::Result<(Self, PathBuf)> {
        std::fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%Y.%m.%d_%H.%M.%S");
        let path = dir.as_ref().join(format!("log_{stamp}.csv"));
        let log = Self::create(&path)?;
        Ok((log, path))
    }

    /// Append one measurement-cycle row.
    pub fn record(
        &mut self,
        iteration: u32,
        point: &OperatingPoint,
        calibration: &Calibration,
    ) -> io::Result<()> {
        let date = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let elapsed = elapsed_string(self.start.elapsed());
        writeln!(
            self.writer,
            "{date},{elapsed},{iteration},{:.3},{:.3},{:.3}",
            point.current * 1000.0,
            point.resistance,
            point.delta_t(calibration),
        )?;
        self.writer.flush()
    }
}

/// Format an elapsed duration as `HH:MM:SS.mmm`.
fn elapsed_string(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = elapsed.subsec_millis();
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "isotherm_log_test_{name}_{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(elapsed_string(Duration::ZERO), "00:00:00.000");
        assert_eq!(elapsed_string(Duration::from_millis(61_042)), "00:01:01.042");
        assert_eq!(
            elapsed_string(Duration::from_secs(2 * 3600 + 3 * 60 + 4)),
            "02:03:04.000"
        );
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = temp_path("rows");
        let (mut log, path) = CycleLog::create_in(&dir).unwrap();

        let cal = Calibration::new(10.0, 20.0, 0.0033).unwrap();
        let point = OperatingPoint {
            current: 0.01,
            voltage: 0.1,
            resistance: 10.0,
            temperature: 20.0,
            power: 0.001,
        };
        log.record(1, &point, &cal).unwrap();
        log.record(2, &point, &cal).unwrap();
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        // current logged in mA
        assert!(lines[1].contains(",1,10.000,10.000,0.000"), "{}", lines[1]);
        assert!(lines[2].contains(",2,10.000,10.000,0.000"), "{}", lines[2]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_name_is_session_stamped() {
        let dir = temp_path("stamp");
        let (_log, path) = CycleLog::create_in(&dir).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("log_"));
        assert!(name.ends_with(".csv"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
