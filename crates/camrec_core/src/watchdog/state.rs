//! Persisted per-station watchdog state.
//!
//! The watchdog usually runs as a one-shot invocation from a timer, so the
//! restart guard has to survive between processes. State lives in a single
//! JSON file replaced atomically on every save.

use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the state file inside the state directory.
pub const STATE_FILE: &str = "watchdog.json";
const STATE_TEMP: &str = "watchdog.json.tmp";

/// Health of one station's producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StationHealth {
    /// Fresh segments are arriving.
    #[default]
    Healthy,
    /// No fresh segment since `since` was first observed.
    Stalled {
        /// When the stall was detected.
        since: DateTime<Utc>,
    },
    /// A restart was requested at `at`; waiting for it to take effect.
    RestartIssued {
        /// When the restart was requested.
        at: DateTime<Utc>,
    },
}

impl StationHealth {
    /// Short lowercase name for logs and status output.
    pub fn name(&self) -> &'static str {
        match self {
            StationHealth::Healthy => "healthy",
            StationHealth::Stalled { .. } => "stalled",
            StationHealth::RestartIssued { .. } => "restart-issued",
        }
    }
}

/// Health of every station seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogState {
    /// Per-station health, keyed by station id.
    #[serde(default)]
    pub stations: BTreeMap<String, StationHealth>,
}

impl WatchdogState {
    /// Health of `station`; unknown stations are healthy.
    pub fn get(&self, station: &str) -> StationHealth {
        self.stations.get(station).copied().unwrap_or_default()
    }

    /// Sets the health of `station`.
    pub fn set(&mut self, station: &str, health: StationHealth) {
        self.stations.insert(station.to_string(), health);
    }
}

/// Location of the persisted watchdog state.
#[derive(Debug, Clone)]
pub struct StateFile {
    dir: PathBuf,
}

impl StateFile {
    /// State file inside `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the state file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Loads the state; a missing or unreadable file yields an empty state.
    pub fn load(&self) -> CoreResult<WatchdogState> {
        let path = self.path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WatchdogState::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&text) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding corrupt watchdog state");
                Ok(WatchdogState::default())
            }
        }
    }

    /// Saves the state: temp file, fsync, rename, directory fsync.
    pub fn save(&self, state: &WatchdogState) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        let temp_path = self.dir.join(STATE_TEMP);
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path())?;
        sync_directory(&self.dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_empty_state() {
        let temp = tempdir().unwrap();
        let state = StateFile::new(temp.path()).load().unwrap();
        assert!(state.stations.is_empty());
        assert_eq!(state.get("ROST1"), StationHealth::Healthy);
    }

    #[test]
    fn save_then_load() {
        let temp = tempdir().unwrap();
        let file = StateFile::new(temp.path().join("state"));
        let at = Utc.with_ymd_and_hms(2025, 5, 28, 12, 0, 0).unwrap();

        let mut state = WatchdogState::default();
        state.set("ROST1", StationHealth::RestartIssued { at });
        state.set("ROST2", StationHealth::Healthy);
        file.save(&state).unwrap();

        assert_eq!(file.load().unwrap(), state);
        assert!(!temp.path().join("state").join(STATE_TEMP).exists());
        let raw = fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\"restart_issued\""));
    }

    #[test]
    fn corrupt_file_is_discarded() {
        let temp = tempdir().unwrap();
        let file = StateFile::new(temp.path());
        fs::write(file.path(), "{ not json").unwrap();
        assert_eq!(file.load().unwrap(), WatchdogState::default());
    }
}
