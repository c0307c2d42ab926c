//! Run statistics and the end-of-run summary.
//!
//! A [`RunReport`] is produced by a successful master run. It can be
//! exported as JSON or written as the human-readable summary printed by the
//! command line tool.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::types::{SimTime, SlaveIndex};

/// Outcome of one slave in a finished run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaveReport {
    /// Slave index
    pub index: SlaveIndex,

    /// Unique slave name
    pub name: String,

    /// Result artifact written for this slave (e.g. a CSV path)
    pub artifact: Option<String>,
}

/// Statistics of a finished co-simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Start time of the run
    pub start_time: SimTime,

    /// Requested end time
    pub end_time: SimTime,

    /// Fixed macro step size
    pub step_size: SimTime,

    /// Macro steps taken
    pub steps: u64,

    /// Time reached after the last step
    pub final_time: SimTime,

    /// Rows emitted per slave, including the initial row
    pub rows_per_slave: u64,

    /// Couplings propagated every step
    pub couplings_active: usize,

    /// Couplings skipped because of a type mismatch
    pub couplings_disabled: usize,

    /// Total values copied between slaves
    pub values_propagated: u64,

    /// Reads or writes that failed during propagation
    pub propagation_failures: u64,

    /// Wall-clock duration in milliseconds
    pub wall_time_ms: f64,

    /// Per-slave outcome
    pub slaves: Vec<SlaveReport>,
}

impl RunReport {
    /// Exports the report to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports the report to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Writes the human-readable summary.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(
            w,
            "Simulation from {} to {} terminated successful",
            self.start_time, self.end_time
        )?;
        writeln!(w, "  steps ............ {}", self.steps)?;
        writeln!(w, "  fixed step size .. {}", self.step_size)?;
        if self.couplings_disabled > 0 {
            writeln!(w, "  disabled couplings {}", self.couplings_disabled)?;
        }
        for slave in &self.slaves {
            if let Some(artifact) = &slave.artifact {
                writeln!(w, "CSV file '{}' written", artifact)?;
            }
        }
        Ok(())
    }

    /// Returns the summary as a string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}
