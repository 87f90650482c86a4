use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::TrackerError;

const REPORT_FILE: &str = "object_tracker.json";

/// Sizes of every tracker table at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TableSizes {
    pub file_names: usize,
    pub pending: usize,
    pub written: usize,
    pub objects: usize,
    pub addresses: usize,
    pub current_id: u64,
}

/// One entry of the tracker report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    /// Seconds since reporting was enabled.
    pub elapsed: f64,
    #[serde(flatten)]
    pub sizes: TableSizes,
}

#[derive(Debug)]
pub(crate) struct Report {
    started: Instant,
    pub(crate) entries: Vec<Snapshot>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
        }
    }
}

impl Report {
    /// Restarts the clock the elapsed times are measured against.
    pub(crate) fn restart(&mut self) {
        self.started = Instant::now();
    }

    pub(crate) fn record(&mut self, sizes: TableSizes) {
        self.entries.push(Snapshot {
            elapsed: self.started.elapsed().as_secs_f64(),
            sizes,
        });
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Stores the snapshot series as `object_tracker.json` inside `dir`.
pub(crate) fn write(entries: &[Snapshot], dir: &Utf8Path) -> Result<Utf8PathBuf, TrackerError> {
    fs::create_dir_all(dir)?;

    let path = dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(&path, json)?;

    tracing::debug!("object tracker report stored in {}", path);
    Ok(path)
}
