use std::path::PathBuf;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use log::debug;

/// Measures the time between consecutive ticks.
pub struct TickTimer {
    last: Instant,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds since the previous tick (or since creation).
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_log(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the scan-sequence file of each scan is written.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceOutput {
    pub dir: PathBuf,
    pub name: String,
    /// Appends `_%Y%m%d_%H%M%S` to `name`.
    pub auto_append_timestamp: bool,
    pub overwrite: bool,
}

impl Default for SequenceOutput {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("saved_sequences"),
            name: "Scan_sequence".to_string(),
            auto_append_timestamp: true,
            overwrite: false,
        }
    }
}

impl SequenceOutput {
    pub fn path_at(&self, time: NaiveDateTime) -> PathBuf {
        let mut file_name = self.name.clone();
        if self.auto_append_timestamp {
            file_name.push_str(&time.format("_%Y%m%d_%H%M%S").to_string());
        }
        file_name.push_str(".ini");
        self.dir.join(file_name)
    }

    pub fn path(&self) -> PathBuf {
        self.path_at(Local::now().naive_local())
    }
}
