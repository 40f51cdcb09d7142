//! Reclaimer: deletes staged segments the ledger proves were replicated.

use crate::config::PipelineConfig;
use crate::error::{CoreError, CoreResult, Failure};
use crate::ledger::SyncLedger;
use crate::lock::{LockDir, RECLAIM_LOCK};
use camrec_store::SegmentStore;
use tracing::{debug, info, warn};

/// Outcome of one reclaim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Staged files examined.
    pub examined: usize,
    /// Files deleted by this pass.
    pub deleted: usize,
    /// Files kept because the ledger does not list them yet.
    pub retained: usize,
    /// Recorded files that had already disappeared.
    pub already_gone: usize,
    /// Empty directories removed afterwards.
    pub pruned_dirs: usize,
    /// Per-file failures; the pass continued past them.
    pub failures: Vec<Failure>,
    /// The pass did nothing because another reclaim was running.
    pub skipped: bool,
}

/// Deletes ledger-confirmed files from staging.
#[derive(Debug, Clone)]
pub struct Reclaimer {
    store: SegmentStore,
    ledger: SyncLedger,
    locks: LockDir,
}

impl Reclaimer {
    /// Creates a reclaimer from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> CoreResult<Self> {
        Ok(Self {
            store: config.segment_store(),
            ledger: SyncLedger::open(&config.ledger_dir)?
                .with_scan_window(config.replication.ledger_scan_days),
            locks: LockDir::new(&config.lock_dir),
        })
    }

    /// Runs one pass.
    ///
    /// The ledger is read once up front. It only grows, so anything in the
    /// snapshot stays provably replicated for the rest of the pass; a file
    /// recorded after the snapshot waits for the next pass.
    pub fn run(&self) -> CoreResult<ReclaimReport> {
        let _guard = match self.locks.try_acquire(RECLAIM_LOCK) {
            Ok(guard) => guard,
            Err(e) if e.is_lock_held() => {
                info!(error = %e, "reclaim already running, skipping");
                return Ok(ReclaimReport {
                    skipped: true,
                    ..ReclaimReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let recorded = self.ledger.recorded_set()?;
        let staged = self.store.staged_segments()?;
        let mut report = ReclaimReport {
            examined: staged.len(),
            ..ReclaimReport::default()
        };

        for file in &staged {
            if !recorded.contains(&file.relative) {
                report.retained += 1;
                continue;
            }
            match self.store.delete_staged(file) {
                Ok(true) => {
                    debug!(path = %file.relative, "deleted replicated segment");
                    report.deleted += 1;
                }
                Ok(false) => report.already_gone += 1,
                Err(e) => {
                    let e = CoreError::from(e);
                    warn!(path = %file.relative, error = %e, "delete failed");
                    report.failures.push(Failure::new(&file.relative, &e));
                }
            }
        }

        match self.store.prune_staging() {
            Ok(pruned) => report.pruned_dirs = pruned,
            Err(e) => {
                let e = CoreError::from(e);
                warn!(error = %e, "pruning staging tree failed");
                report.failures.push(Failure::new(
                    self.store.staging_root().display().to_string(),
                    &e,
                ));
            }
        }

        info!(
            examined = report.examined,
            deleted = report.deleted,
            retained = report.retained,
            failures = report.failures.len(),
            "reclaim pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const RECORDED: &str = "ROST1/2025-05-28/ROST1_20250528T120000.mkv";
    const UNLISTED: &str = "ROST1/2025-05-28/ROST1_20250528T121000.mkv";

    fn setup(temp: &TempDir) -> PipelineConfig {
        let config = PipelineConfig::new(
            temp.path().join("live"),
            temp.path().join("staging"),
            temp.path().join("synced"),
            temp.path().join("locks"),
            "nas:/cameras",
        );
        for rel in [RECORDED, UNLISTED] {
            let path = config.staging_root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"segment").unwrap();
        }
        config
    }

    #[test]
    fn deletes_only_recorded_files() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        SyncLedger::open(&config.ledger_dir)
            .unwrap()
            .record_success(NaiveDate::from_ymd_opt(2025, 5, 28).unwrap(), &[RECORDED])
            .unwrap();

        let report = Reclaimer::new(&config).unwrap().run().unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.retained, 1);
        assert!(!config.staging_root.join(RECORDED).exists());
        assert!(config.staging_root.join(UNLISTED).exists());
    }

    #[test]
    fn empty_ledger_deletes_nothing() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let report = Reclaimer::new(&config).unwrap().run().unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.retained, 2);
    }

    #[test]
    fn prunes_emptied_directories() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let ledger = SyncLedger::open(&config.ledger_dir).unwrap();
        ledger
            .record_success(NaiveDate::from_ymd_opt(2025, 5, 29).unwrap(), &[RECORDED, UNLISTED])
            .unwrap();

        let report = Reclaimer::new(&config).unwrap().run().unwrap();
        assert_eq!(report.deleted, 2);
        assert!(!config.staging_root.join("ROST1").exists());
        assert!(config.staging_root.exists());
    }

    #[test]
    fn skips_while_another_reclaim_runs() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        SyncLedger::open(&config.ledger_dir)
            .unwrap()
            .record_success(NaiveDate::from_ymd_opt(2025, 5, 28).unwrap(), &[RECORDED])
            .unwrap();
        let _held = LockDir::new(&config.lock_dir).try_acquire(RECLAIM_LOCK).unwrap();

        let report = Reclaimer::new(&config).unwrap().run().unwrap();
        assert!(report.skipped);
        assert!(config.staging_root.join(RECORDED).exists());
    }

    #[test]
    fn missing_staging_root_is_empty_pass() {
        let temp = tempdir().unwrap();
        let config = PipelineConfig::new(
            temp.path().join("live"),
            temp.path().join("staging"),
            temp.path().join("synced"),
            temp.path().join("locks"),
            "nas:/cameras",
        );
        let report = Reclaimer::new(&config).unwrap().run().unwrap();
        assert_eq!(report.examined, 0);
        assert!(report.failures.is_empty());
    }
}
