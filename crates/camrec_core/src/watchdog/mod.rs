//! Producer stall detection and restart.
//!
//! A producer can hang on a dead upstream feed without exiting, so process
//! liveness says nothing. The only signal used here is freshness: the age
//! of the newest segment in the station's live directory.
//!
//! ```text
//!            stale                 restart ok
//! Healthy ─────────► Stalled ─────────────────► RestartIssued
//!    ▲                 │  ▲    restart failed        │
//!    │                 │  └─────────(retry)          │
//!    │      fresh      │                             │ newer segment, or
//!    └─────────────────┴─────────────────────────────┘ restart grace elapsed
//! ```
//!
//! A notification is sent once, on entering `Stalled`. While a station sits
//! in `RestartIssued` no further restart is issued until the restart grace
//! (one evaluation period by default) has passed.
//!
//! Evaluations hold the `watchdog` lock from loading the state file until
//! saving it; an evaluation that finds the lock held is skipped.

mod state;

pub use state::{StateFile, StationHealth, WatchdogState, STATE_FILE};

use crate::config::{PipelineConfig, StationConfig};
use crate::error::{CoreError, CoreResult, ErrorClass, Failure};
use crate::lock::{LockDir, WATCHDOG_LOCK};
use crate::notify::Notifier;
use crate::supervisor::Supervisor;
use camrec_store::SegmentStore;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the watchdog did for one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Healthy and fresh; nothing to do.
    None,
    /// A pending restart took effect or expired.
    Recovered,
    /// A restart was requested.
    RestartIssued,
    /// The restart request failed; retried next evaluation.
    RestartFailed(String),
    /// Waiting for an earlier restart to take effect.
    AwaitingRestart,
}

/// Evaluation result for one station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationReport {
    /// Station id.
    pub station: String,
    /// Producer unit name.
    pub unit: String,
    /// Age of the newest segment, or `None` if there is none.
    pub idle: Option<Duration>,
    /// Health before this evaluation.
    pub previous: StationHealth,
    /// Health after this evaluation.
    pub health: StationHealth,
    /// Action taken.
    pub action: WatchdogAction,
    /// Whether a notification was sent (or attempted).
    pub notified: bool,
}

/// Outcome of one watchdog evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// Per-station results, sorted by station.
    pub stations: Vec<StationReport>,
    /// Stations that could not be evaluated, and notification failures.
    pub failures: Vec<Failure>,
    /// Another evaluation was in progress; nothing was evaluated.
    pub skipped: bool,
}

impl WatchdogReport {
    /// Number of restarts requested.
    pub fn restarts(&self) -> usize {
        self.stations
            .iter()
            .filter(|s| s.action == WatchdogAction::RestartIssued)
            .count()
    }

    /// Number of notifications sent.
    pub fn notifications(&self) -> usize {
        self.stations.iter().filter(|s| s.notified).count()
    }

    /// Report for `station`, if it was evaluated.
    pub fn station(&self, station: &str) -> Option<&StationReport> {
        self.stations.iter().find(|s| s.station == station)
    }
}

/// Per-station stall detector.
pub struct Watchdog<S, N> {
    store: SegmentStore,
    stations: Vec<StationConfig>,
    threshold: Duration,
    restart_grace: Duration,
    state: StateFile,
    locks: LockDir,
    supervisor: S,
    notifier: N,
    host: String,
}

impl<S: Supervisor, N: Notifier> Watchdog<S, N> {
    /// Creates a watchdog over the configured stations.
    pub fn new(config: &PipelineConfig, supervisor: S, notifier: N) -> Self {
        Self {
            store: config.segment_store(),
            stations: config.stations.clone(),
            threshold: config.staleness_threshold(),
            restart_grace: config.watchdog.restart_grace(),
            state: StateFile::new(config.state_dir()),
            locks: LockDir::new(&config.lock_dir),
            supervisor,
            notifier,
            host: crate::host_name(),
        }
    }

    /// Overrides the host name used in notifications.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// The supervision collaborator.
    pub fn supervisor(&self) -> &S {
        &self.supervisor
    }

    /// The notification collaborator.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Newest-segment age beyond which a station is stalled.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Persisted health, as of the last evaluation.
    pub fn health(&self) -> CoreResult<WatchdogState> {
        self.state.load()
    }

    /// Evaluates every station now.
    pub fn evaluate(&self) -> CoreResult<WatchdogReport> {
        self.evaluate_at(Utc::now())
    }

    /// Evaluates every station as of `now`.
    ///
    /// Fails only if the live root is unusable or state cannot be saved.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> CoreResult<WatchdogReport> {
        let guard = match self.locks.try_acquire(WATCHDOG_LOCK) {
            Ok(guard) => guard,
            Err(e) if e.is_lock_held() => {
                info!(error = %e, "watchdog evaluation already running, skipping");
                return Ok(WatchdogReport {
                    skipped: true,
                    ..WatchdogReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let mut stations: BTreeSet<String> = self.store.list_stations()?.into_iter().collect();
        stations.extend(self.stations.iter().map(|s| s.id.clone()));

        let mut state = self.state.load()?;
        let mut report = WatchdogReport::default();
        for station in &stations {
            match self.evaluate_station(station, now, &mut state, &mut report.failures) {
                Ok(station_report) => report.stations.push(station_report),
                Err(e) => {
                    warn!(station, error = %e, class = %e.class(), "station evaluation failed");
                    report.failures.push(Failure::new(station, &e));
                }
            }
        }
        state.stations.retain(|station, _| stations.contains(station));
        self.state.save(&state)?;
        guard.release()?;

        info!(
            stations = report.stations.len(),
            restarts = report.restarts(),
            notifications = report.notifications(),
            "watchdog evaluation complete"
        );
        Ok(report)
    }

    fn evaluate_station(
        &self,
        station: &str,
        now: DateTime<Utc>,
        state: &mut WatchdogState,
        failures: &mut Vec<Failure>,
    ) -> CoreResult<StationReport> {
        let newest = self
            .store
            .newest_segment(station)?
            .map(|segment| DateTime::<Utc>::from(segment.modified));
        let idle = newest.map(|modified| (now - modified).to_std().unwrap_or_default());
        let stale = idle.map_or(true, |idle| idle > self.threshold);
        let previous = state.get(station);
        let unit = self.unit_for(station);

        let mut report = StationReport {
            station: station.to_string(),
            unit: unit.clone(),
            idle,
            previous,
            health: previous,
            action: WatchdogAction::None,
            notified: false,
        };

        let mut entering_stall = false;
        let since = match previous {
            StationHealth::RestartIssued { at } => {
                let recovered = newest.is_some_and(|modified| modified > at);
                let expired = (now - at).to_std().unwrap_or_default() >= self.restart_grace;
                if !recovered && !expired {
                    debug!(station, "restart pending, not re-issuing");
                    report.action = WatchdogAction::AwaitingRestart;
                    return Ok(report);
                }
                report.action = WatchdogAction::Recovered;
                report.health = StationHealth::Healthy;
                if !stale {
                    info!(station, "producer recovered after restart");
                    state.set(station, StationHealth::Healthy);
                    return Ok(report);
                }
                // The restart did not help; this is a new stall.
                entering_stall = true;
                now
            }
            StationHealth::Stalled { since } => {
                if !stale {
                    info!(station, "producer recovered");
                    report.action = WatchdogAction::Recovered;
                    report.health = StationHealth::Healthy;
                    state.set(station, StationHealth::Healthy);
                    return Ok(report);
                }
                since
            }
            StationHealth::Healthy => {
                if !stale {
                    state.set(station, StationHealth::Healthy);
                    return Ok(report);
                }
                entering_stall = true;
                now
            }
        };

        warn!(
            station,
            unit = %unit,
            idle_secs = idle.map(|d| d.as_secs()),
            threshold_secs = self.threshold.as_secs(),
            class = %ErrorClass::ProducerStall,
            "producer stalled"
        );
        let was_active = self.supervisor.is_active(&unit).ok();

        let restart = self.supervisor.restart(&unit);
        match &restart {
            Ok(()) => {
                report.action = WatchdogAction::RestartIssued;
                report.health = StationHealth::RestartIssued { at: now };
            }
            Err(e) => {
                warn!(station, unit = %unit, error = %e, "restart failed, retrying next evaluation");
                report.action = WatchdogAction::RestartFailed(e.to_string());
                report.health = StationHealth::Stalled { since };
            }
        }
        state.set(station, report.health);

        if entering_stall {
            report.notified = true;
            let subject = format!("[camrec] {station} stalled on {}", self.host);
            let body = self.notification_body(station, &unit, idle, now, was_active, &restart);
            if let Err(e) = self.notifier.notify(&subject, &body) {
                warn!(station, error = %e, "notification failed");
                failures.push(Failure::new(station, &e));
            }
        }
        Ok(report)
    }

    fn unit_for(&self, station: &str) -> String {
        self.stations
            .iter()
            .find(|s| s.id == station)
            .map(StationConfig::unit_name)
            .unwrap_or_else(|| crate::config::default_unit_name(station))
    }

    fn notification_body(
        &self,
        station: &str,
        unit: &str,
        idle: Option<Duration>,
        now: DateTime<Utc>,
        was_active: Option<bool>,
        restart: &Result<(), CoreError>,
    ) -> String {
        let idle = match idle {
            Some(idle) => format!("{}s", idle.as_secs()),
            None => "no segments".to_string(),
        };
        let active = match was_active {
            Some(true) => "active",
            Some(false) => "inactive",
            None => "unknown",
        };
        let outcome = match restart {
            Ok(()) => "restart requested".to_string(),
            Err(e) => format!("restart failed: {e}"),
        };
        format!(
            "station: {station}\n\
             idle: {idle}\n\
             threshold: {}s\n\
             host: {}\n\
             time: {}\n\
             unit: {unit} ({active})\n\
             action: {outcome}\n",
            self.threshold.as_secs(),
            self.host,
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MockNotifier;
    use chrono::SubsecRound;
    use crate::supervisor::MockSupervisor;
    use std::fs::{self, File};
    use std::sync::Arc;
    use std::time::SystemTime;
    use tempfile::{tempdir, TempDir};

    fn config(temp: &TempDir) -> PipelineConfig {
        let config = PipelineConfig::new(
            temp.path().join("live"),
            temp.path().join("staging"),
            temp.path().join("synced"),
            temp.path().join("locks"),
            "nas:/cameras",
        );
        fs::create_dir_all(&config.live_root).unwrap();
        config
    }

    fn segment_aged(config: &PipelineConfig, station: &str, now: DateTime<Utc>, age: Duration) {
        let dir = config.live_root.join(station);
        fs::create_dir_all(&dir).unwrap();
        let mtime = SystemTime::from(now) - age;
        let start = DateTime::<Utc>::from(mtime).format("%Y%m%dT%H%M%S");
        let path = dir.join(format!("{station}_{start}.mkv"));
        fs::write(&path, b"x").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn watchdog(config: &PipelineConfig) -> Watchdog<MockSupervisor, MockNotifier> {
        Watchdog::new(config, MockSupervisor::new(), MockNotifier::new()).with_host("nas-pi")
    }

    #[test]
    fn stale_station_restarts_once_and_notifies() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let dog = watchdog(&config);
        let report = dog.evaluate_at(now).unwrap();
        assert_eq!(report.restarts(), 1);
        assert_eq!(report.notifications(), 1);
        assert_eq!(dog.supervisor().restarts(), vec!["record_camera_ROST1.service"]);

        let sent = dog.notifier().sent();
        assert_eq!(sent[0].subject, "[camrec] ROST1 stalled on nas-pi");
        assert!(sent[0].body.contains("idle: 1300s"));
        assert!(sent[0].body.contains("station: ROST1"));
    }

    #[test]
    fn fresh_station_is_left_alone() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1199));

        let dog = watchdog(&config);
        let report = dog.evaluate_at(now).unwrap();
        assert_eq!(report.restarts(), 0);
        assert!(dog.notifier().sent().is_empty());
        assert_eq!(report.station("ROST1").unwrap().health, StationHealth::Healthy);
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        // Whole seconds, so mtime precision cannot shift the boundary.
        let now = Utc::now().trunc_subsecs(0);
        segment_aged(&config, "AT", now, Duration::from_secs(1200));
        segment_aged(&config, "OVER", now, Duration::from_secs(1201));

        let dog = watchdog(&config);
        let report = dog.evaluate_at(now).unwrap();
        assert_eq!(report.station("AT").unwrap().action, WatchdogAction::None);
        assert_eq!(report.station("AT").unwrap().health, StationHealth::Healthy);
        assert_eq!(report.station("OVER").unwrap().action, WatchdogAction::RestartIssued);
        assert_eq!(report.restarts(), 1);
        assert_eq!(report.notifications(), 1);
        assert_eq!(dog.supervisor().restarts(), vec!["record_camera_OVER.service"]);
        assert!(dog.notifier().sent()[0].body.contains("idle: 1201s"));
    }

    /// Starts a second evaluation from inside the first one's restart.
    struct OverlappingSupervisor {
        config: PipelineConfig,
        inner: MockSupervisor,
        overlapped: parking_lot::Mutex<Option<WatchdogReport>>,
        nested: Arc<MockSupervisor>,
    }

    impl Supervisor for OverlappingSupervisor {
        fn restart(&self, unit: &str) -> CoreResult<()> {
            if self.overlapped.lock().is_none() {
                let nested = Arc::clone(&self.nested);
                let other = Watchdog::new(&self.config, nested, MockNotifier::new());
                let report = other.evaluate().unwrap();
                *self.overlapped.lock() = Some(report);
            }
            self.inner.restart(unit)
        }

        fn is_active(&self, unit: &str) -> CoreResult<bool> {
            self.inner.is_active(unit)
        }
    }

    #[test]
    fn overlapping_evaluation_is_skipped() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let supervisor = OverlappingSupervisor {
            config: config.clone(),
            inner: MockSupervisor::new(),
            overlapped: parking_lot::Mutex::new(None),
            nested: Arc::new(MockSupervisor::new()),
        };
        let dog = Watchdog::new(&config, supervisor, MockNotifier::new());
        let report = dog.evaluate_at(now).unwrap();

        assert_eq!(report.restarts(), 1);
        assert!(!report.skipped);
        let overlapped = dog.supervisor().overlapped.lock().clone().unwrap();
        assert!(overlapped.skipped);
        assert!(overlapped.stations.is_empty());
        assert!(dog.supervisor().nested.restarts().is_empty());
        assert_eq!(dog.supervisor().inner.restarts(), vec!["record_camera_ROST1.service"]);
        assert_eq!(dog.notifier().sent().len(), 1);

        // The lock is released afterwards; the next evaluation runs.
        let next = dog.evaluate_at(now).unwrap();
        assert!(!next.skipped);
        assert_eq!(next.station("ROST1").unwrap().action, WatchdogAction::AwaitingRestart);
    }

    #[test]
    fn guard_blocks_repeat_restart_within_grace() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let dog = watchdog(&config);
        dog.evaluate_at(now).unwrap();
        let later = now + chrono::Duration::seconds(60);
        let report = dog.evaluate_at(later).unwrap();
        assert_eq!(report.station("ROST1").unwrap().action, WatchdogAction::AwaitingRestart);
        assert_eq!(dog.supervisor().restarts().len(), 1);
        assert_eq!(dog.notifier().sent().len(), 1);
    }

    #[test]
    fn new_segment_clears_restart() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let dog = watchdog(&config);
        dog.evaluate_at(now).unwrap();
        let later = now + chrono::Duration::seconds(60);
        segment_aged(&config, "ROST1", later, Duration::from_secs(5));

        let report = dog.evaluate_at(later).unwrap();
        let station = report.station("ROST1").unwrap();
        assert_eq!(station.action, WatchdogAction::Recovered);
        assert_eq!(station.health, StationHealth::Healthy);
        assert_eq!(dog.health().unwrap().get("ROST1"), StationHealth::Healthy);
    }

    #[test]
    fn expired_restart_without_recovery_restarts_again() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let dog = watchdog(&config);
        dog.evaluate_at(now).unwrap();
        let later = now + chrono::Duration::seconds(300);
        let report = dog.evaluate_at(later).unwrap();
        assert_eq!(report.restarts(), 1);
        assert_eq!(dog.supervisor().restarts().len(), 2);
    }

    #[test]
    fn failed_restart_stays_stalled_and_notifies_once() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));

        let dog = watchdog(&config);
        dog.supervisor().set_fail_restart(true);
        let report = dog.evaluate_at(now).unwrap();
        let station = report.station("ROST1").unwrap();
        assert!(matches!(station.action, WatchdogAction::RestartFailed(_)));
        assert_eq!(station.health, StationHealth::Stalled { since: now });
        assert!(dog.notifier().sent()[0].body.contains("restart failed"));

        dog.supervisor().set_fail_restart(false);
        let report = dog.evaluate_at(now + chrono::Duration::seconds(300)).unwrap();
        assert_eq!(report.restarts(), 1);
        assert_eq!(dog.notifier().sent().len(), 1);
    }

    #[test]
    fn notify_failure_does_not_block_restart() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(5000));

        let dog = watchdog(&config);
        dog.notifier().set_fail(true);
        let report = dog.evaluate_at(now).unwrap();
        assert_eq!(report.restarts(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].subject, "ROST1");
    }

    #[test]
    fn configured_station_without_segments_is_stalled() {
        let temp = tempdir().unwrap();
        let config = config(&temp).with_station(StationConfig {
            id: "ROST7".into(),
            unit: Some("cam7.service".into()),
            command: None,
        });

        let dog = watchdog(&config);
        let report = dog.evaluate_at(Utc::now()).unwrap();
        let station = report.station("ROST7").unwrap();
        assert_eq!(station.idle, None);
        assert_eq!(dog.supervisor().restarts(), vec!["cam7.service"]);
        assert!(dog.notifier().sent()[0].body.contains("no segments"));
    }

    #[test]
    fn stations_are_isolated() {
        let temp = tempdir().unwrap();
        let config = config(&temp);
        let now = Utc::now();
        segment_aged(&config, "ROST1", now, Duration::from_secs(1300));
        segment_aged(&config, "ROST2", now, Duration::from_secs(30));

        let dog = watchdog(&config);
        let report = dog.evaluate_at(now).unwrap();
        assert_eq!(report.stations.len(), 2);
        assert_eq!(dog.supervisor().restarts(), vec!["record_camera_ROST1.service"]);
    }
}
