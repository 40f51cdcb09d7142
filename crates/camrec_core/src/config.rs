//! Pipeline configuration.
//!
//! One JSON document configures every component. Each component receives
//! the config (or the part it needs) at construction; nothing reads
//! process-wide state.
//!
//! ```json
//! {
//!   "live_root": "/srv/cameras",
//!   "staging_root": "/srv/ready_for_backup",
//!   "ledger_dir": "/var/lib/camrec/synced",
//!   "lock_dir": "/run/camrec",
//!   "segment": { "interval_secs": 600 },
//!   "stations": [{ "id": "ROST1" }, { "id": "ROST2" }],
//!   "replication": { "target": "nas:/volume1/cameras" }
//! }
//! ```
//!
//! ## Timing assumptions
//!
//! The producer is expected to give up on an unreachable upstream after
//! `upstream_grace_secs` (30 s by default, matching a 30 s read timeout)
//! and to roll files every `interval_secs`. A station is stale once its
//! newest file is older than `interval × staleness_multiplier`, so that
//! threshold must exceed `interval + upstream_grace` or a healthy
//! producer that is reconnecting would be restarted.

use crate::error::{CoreError, CoreResult};
use camrec_store::{validate_station_id, SegmentStore, DEFAULT_EXTENSION};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Segment cadence and naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Producer rotation interval in seconds.
    pub interval_secs: u64,
    /// Segment file extension.
    pub extension: String,
    /// A segment is closed once older than `interval × closure_multiplier`.
    pub closure_multiplier: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            extension: DEFAULT_EXTENSION.to_string(),
            closure_multiplier: 2,
        }
    }
}

impl SegmentConfig {
    /// Producer rotation interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Minimum mtime age for a segment to count as closed.
    pub fn closure_threshold(&self) -> Duration {
        self.interval().saturating_mul(self.closure_multiplier)
    }
}

/// One camera station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identifier, also the live directory name.
    pub id: String,
    /// Supervised unit name of the producer; defaults to
    /// `record_camera_<id>.service`.
    #[serde(default)]
    pub unit: Option<String>,
    /// Producer command line, used only when generating unit files.
    #[serde(default)]
    pub command: Option<String>,
}

impl StationConfig {
    /// Creates a station entry with default unit naming.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit: None,
            command: None,
        }
    }

    /// Supervised unit name for this station's producer.
    pub fn unit_name(&self) -> String {
        self.unit
            .clone()
            .unwrap_or_else(|| default_unit_name(&self.id))
    }
}

/// Unit name used for stations without an explicit `unit`.
pub fn default_unit_name(station: &str) -> String {
    format!("record_camera_{station}.service")
}

/// Stall detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Stale once the newest segment is older than `interval × staleness_multiplier`.
    pub staleness_multiplier: u32,
    /// How often the watchdog is expected to evaluate.
    pub evaluation_period_secs: u64,
    /// Minimum time between restarts of one station; defaults to the
    /// evaluation period.
    pub restart_grace_secs: Option<u64>,
    /// How long the producer waits on an unreachable upstream before giving up.
    pub upstream_grace_secs: u64,
    /// Timeout for supervisor and notifier commands.
    pub action_timeout_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            staleness_multiplier: 2,
            evaluation_period_secs: 300,
            restart_grace_secs: None,
            upstream_grace_secs: 30,
            action_timeout_secs: 30,
        }
    }
}

impl WatchdogConfig {
    /// Evaluation period.
    pub fn evaluation_period(&self) -> Duration {
        Duration::from_secs(self.evaluation_period_secs)
    }

    /// Minimum time between restarts of one station.
    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(
            self.restart_grace_secs
                .unwrap_or(self.evaluation_period_secs),
        )
    }

    /// Timeout for external actions.
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// Off-node replication settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Remote target passed to the transfer mechanism, e.g. `nas:/volume1/cameras`.
    pub target: String,
    /// Path to the rsync binary.
    #[serde(default = "default_rsync_path")]
    pub rsync_path: PathBuf,
    /// Options passed to rsync before the file list.
    #[serde(default = "default_rsync_options")]
    pub rsync_options: Vec<String>,
    /// Upper bound for one transfer invocation.
    #[serde(default = "default_transfer_timeout")]
    pub timeout_secs: u64,
    /// Restrict ledger membership checks to the newest N partitions.
    #[serde(default)]
    pub ledger_scan_days: Option<u32>,
    /// Transfer attempts per run on retryable failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_rsync_path() -> PathBuf {
    PathBuf::from("rsync")
}

fn default_rsync_options() -> Vec<String> {
    vec!["-a".into(), "--partial".into(), "--inplace".into()]
}

fn default_transfer_timeout() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

impl ReplicationConfig {
    /// Creates replication settings for `target` with defaults elsewhere.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            rsync_path: default_rsync_path(),
            rsync_options: default_rsync_options(),
            timeout_secs: default_transfer_timeout(),
            ledger_scan_days: None,
            max_attempts: default_max_attempts(),
        }
    }

    /// Upper bound for one transfer invocation.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Stall notification delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Command receiving the body on stdin; `{subject}` in any argument is
    /// replaced. Without a command, notifications go to the log.
    pub command: Option<Vec<String>>,
}

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Live recording tree, one directory per station.
    pub live_root: PathBuf,
    /// Staging tree of closed segments awaiting replication.
    pub staging_root: PathBuf,
    /// Directory of date-partitioned ledger files.
    pub ledger_dir: PathBuf,
    /// Directory of per-operation lock files.
    pub lock_dir: PathBuf,
    /// Directory for watchdog state; defaults to `lock_dir`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Segment cadence and naming.
    #[serde(default)]
    pub segment: SegmentConfig,
    /// Stations expected to be recording.
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    /// Stall detection.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Replication.
    pub replication: ReplicationConfig,
    /// Notifications.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl PipelineConfig {
    /// Creates a configuration with default settings for the given paths.
    pub fn new(
        live_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
        ledger_dir: impl Into<PathBuf>,
        lock_dir: impl Into<PathBuf>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            live_root: live_root.into(),
            staging_root: staging_root.into(),
            ledger_dir: ledger_dir.into(),
            lock_dir: lock_dir.into(),
            state_dir: None,
            segment: SegmentConfig::default(),
            stations: Vec::new(),
            watchdog: WatchdogConfig::default(),
            replication: ReplicationConfig::new(target),
            notify: NotifyConfig::default(),
        }
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            CoreError::config(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the segment rotation interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.segment.interval_secs = interval.as_secs();
        self
    }

    /// Sets the closure multiplier.
    #[must_use]
    pub fn with_closure_multiplier(mut self, multiplier: u32) -> Self {
        self.segment.closure_multiplier = multiplier;
        self
    }

    /// Sets the staleness multiplier.
    #[must_use]
    pub fn with_staleness_multiplier(mut self, multiplier: u32) -> Self {
        self.watchdog.staleness_multiplier = multiplier;
        self
    }

    /// Sets the watchdog evaluation period.
    #[must_use]
    pub fn with_evaluation_period(mut self, period: Duration) -> Self {
        self.watchdog.evaluation_period_secs = period.as_secs();
        self
    }

    /// Adds an expected station.
    #[must_use]
    pub fn with_station(mut self, station: StationConfig) -> Self {
        self.stations.push(station);
        self
    }

    /// Sets the watchdog state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Sets the ledger scan window.
    #[must_use]
    pub fn with_ledger_scan_days(mut self, days: Option<u32>) -> Self {
        self.replication.ledger_scan_days = days;
        self
    }

    /// Directory for watchdog state.
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_deref().unwrap_or(&self.lock_dir)
    }

    /// Newest-segment age beyond which a station is stalled.
    pub fn staleness_threshold(&self) -> Duration {
        self.segment
            .interval()
            .saturating_mul(self.watchdog.staleness_multiplier)
    }

    /// Minimum mtime age for a segment to count as closed.
    pub fn closure_threshold(&self) -> Duration {
        self.segment.closure_threshold()
    }

    /// Segment store over the configured live and staging roots.
    pub fn segment_store(&self) -> SegmentStore {
        SegmentStore::new(
            &self.live_root,
            &self.staging_root,
            &self.segment.extension,
        )
    }

    /// Unit name of the producer for `station`.
    pub fn unit_for(&self, station: &str) -> String {
        self.stations
            .iter()
            .find(|s| s.id == station)
            .map(StationConfig::unit_name)
            .unwrap_or_else(|| default_unit_name(station))
    }

    /// Checks the configuration for settings no component can run with.
    pub fn validate(&self) -> CoreResult<()> {
        for (name, path) in [
            ("live_root", &self.live_root),
            ("staging_root", &self.staging_root),
            ("ledger_dir", &self.ledger_dir),
            ("lock_dir", &self.lock_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(CoreError::config(format!("{name} must not be empty")));
            }
        }
        if self.staging_root.starts_with(&self.live_root) {
            return Err(CoreError::config(
                "staging_root must not be inside live_root",
            ));
        }
        if self.live_root.starts_with(&self.staging_root) {
            return Err(CoreError::config(
                "live_root must not be inside staging_root",
            ));
        }
        if self.segment.interval_secs == 0 {
            return Err(CoreError::config("segment.interval_secs must be positive"));
        }
        if self.segment.extension.is_empty() || self.segment.extension.contains('.') {
            return Err(CoreError::config(
                "segment.extension must be a bare extension such as \"mkv\"",
            ));
        }
        if self.segment.closure_multiplier < 1 {
            return Err(CoreError::config("segment.closure_multiplier must be >= 1"));
        }
        if self.watchdog.staleness_multiplier < 1 {
            return Err(CoreError::config("watchdog.staleness_multiplier must be >= 1"));
        }
        if self.watchdog.evaluation_period_secs == 0 {
            return Err(CoreError::config(
                "watchdog.evaluation_period_secs must be positive",
            ));
        }
        let interval = self.segment.interval();
        if interval.checked_mul(self.segment.closure_multiplier).is_none() {
            return Err(CoreError::config(
                "segment.interval_secs × closure_multiplier is out of range",
            ));
        }
        let staleness = interval
            .checked_mul(self.watchdog.staleness_multiplier)
            .ok_or_else(|| {
                CoreError::config("segment.interval_secs × staleness_multiplier is out of range")
            })?;
        let reconnect_budget = interval
            .checked_add(Duration::from_secs(self.watchdog.upstream_grace_secs))
            .ok_or_else(|| {
                CoreError::config("segment.interval_secs + upstream_grace_secs is out of range")
            })?;
        if staleness <= reconnect_budget {
            return Err(CoreError::config(format!(
                "staleness threshold {}s must exceed interval + upstream grace ({}s)",
                staleness.as_secs(),
                reconnect_budget.as_secs()
            )));
        }
        if self.replication.target.trim().is_empty() {
            return Err(CoreError::config("replication.target must not be empty"));
        }
        if self.replication.max_attempts == 0 {
            return Err(CoreError::config("replication.max_attempts must be >= 1"));
        }
        let mut seen = std::collections::HashSet::new();
        for station in &self.stations {
            validate_station_id(&station.id)?;
            if !seen.insert(station.id.as_str()) {
                return Err(CoreError::config(format!(
                    "station {} is listed twice",
                    station.id
                )));
            }
        }
        if let Some(command) = &self.notify.command {
            if command.is_empty() {
                return Err(CoreError::config("notify.command must not be empty"));
            }
        }
        Ok(())
    }
}
