// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-phase performance records.
//!
//! Each finished pipeline phase is logged and, when a CSV path is
//! configured, appended as a `<phase>,<milliseconds>` line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, warn};

/// Collects phase timings for one import run.
#[derive(Debug)]
pub struct PhaseTimer {
    csv_path: Option<PathBuf>,
    records: Vec<(String, u128)>,
}

/// A running measurement, finished via [`PhaseTimer::finish`].
#[derive(Debug)]
pub struct RunningPhase {
    name: String,
    started: Instant,
}

impl PhaseTimer {
    /// Creates a timer, optionally appending records to a CSV file.
    #[must_use]
    pub fn new(csv_path: Option<PathBuf>) -> Self {
        Self {
            csv_path,
            records: Vec::new(),
        }
    }

    /// Starts measuring a phase.
    #[must_use]
    pub fn start(&self, name: &str) -> RunningPhase {
        RunningPhase {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Stops the measurement and records it.
    pub fn finish(&mut self, phase: RunningPhase) {
        let elapsed = phase.started.elapsed().as_millis();
        debug!("phase {} took {}ms", phase.name, elapsed);
        self.records.push((phase.name, elapsed));
    }

    /// All records collected so far as `(phase, milliseconds)`.
    #[must_use]
    pub fn records(&self) -> &[(String, u128)] {
        &self.records
    }

    /// Appends all records to the configured CSV file, if any.
    pub fn write_csv(&self) {
        let Some(path) = &self.csv_path else { return };

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                for (phase, millis) in &self.records {
                    writeln!(file, "{phase},{millis}")?;
                }
                Ok(())
            });
        if let Err(e) = result {
            warn!("Failed to write performance CSV {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_records_accumulate() {
        let mut timer = PhaseTimer::new(None);
        let phase = timer.start("discovery");
        timer.finish(phase);
        let phase = timer.start("nodes");
        timer.finish(phase);

        let names: Vec<&str> = timer.records().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["discovery", "nodes"]);
    }

    #[test]
    fn test_csv_appends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("perf.csv");

        let mut timer = PhaseTimer::new(Some(path.clone()));
        let phase = timer.start("edges");
        timer.finish(phase);
        timer.write_csv();

        let mut second = PhaseTimer::new(Some(path.clone()));
        let phase = second.start("diagnostics");
        second.finish(phase);
        second.write_csv();

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("edges,"));
        assert!(lines[1].starts_with("diagnostics,"));
        Ok(())
    }

    #[test]
    fn test_no_csv_path_is_silent() {
        let mut timer = PhaseTimer::new(None);
        let phase = timer.start("noop");
        timer.finish(phase);
        timer.write_csv();
    }
}
