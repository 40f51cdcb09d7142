//! The replicator: staged files → remote target → ledger.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::transfer::{Transfer, TransferOutcome};
use camrec_core::{LockDir, PipelineConfig, SyncLedger, REPLICATE_LOCK};
use camrec_store::SegmentStore;
use chrono::{DateTime, Local, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Phase of the current (or last) replication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    /// No run has started.
    Idle,
    /// Acquiring the replication lock.
    Locking,
    /// Comparing the staging tree with the ledger.
    Scanning,
    /// Transfer mechanism running.
    Transferring,
    /// Appending confirmed files to the ledger.
    Recording,
    /// Run finished.
    Done,
    /// Another live run held the lock.
    Skipped,
    /// Run failed; nothing unconfirmed was recorded.
    Failed,
}

impl ReplicatorState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReplicatorState::Locking
                | ReplicatorState::Scanning
                | ReplicatorState::Transferring
                | ReplicatorState::Recording
        )
    }
}

/// Cumulative statistics across runs of one replicator.
#[derive(Debug, Clone, Default)]
pub struct ReplicatorStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs skipped on lock conflict.
    pub runs_skipped: u64,
    /// Files confirmed and recorded.
    pub files_transferred: u64,
    /// Files requested but not confirmed.
    pub files_failed: u64,
    /// Transfer re-invocations.
    pub retries: u64,
    /// When the last run finished.
    pub last_run: Option<DateTime<Utc>>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one replication run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Staged files not yet in the ledger.
    pub pending: usize,
    /// Files confirmed by the transfer and recorded.
    pub transferred: usize,
    /// Files the transfer did not confirm; retried next run.
    pub failed: usize,
    /// Transfer invocations made.
    pub attempts: u32,
    /// Another live run held the lock; nothing was done.
    pub skipped: bool,
    /// A dead holder's lock was reclaimed.
    pub reclaimed_stale_lock: bool,
}

/// Replicates the staging tree and records confirmed files.
pub struct Replicator<T: Transfer> {
    store: SegmentStore,
    ledger: SyncLedger,
    locks: LockDir,
    target: String,
    retry: RetryConfig,
    transfer: T,
    state: RwLock<ReplicatorState>,
    stats: RwLock<ReplicatorStats>,
}

impl<T: Transfer> Replicator<T> {
    /// Creates a replicator from the pipeline configuration.
    pub fn new(config: &PipelineConfig, transfer: T) -> SyncResult<Self> {
        Ok(Self {
            store: config.segment_store(),
            ledger: SyncLedger::open(&config.ledger_dir)?
                .with_scan_window(config.replication.ledger_scan_days),
            locks: LockDir::new(&config.lock_dir),
            target: config.replication.target.clone(),
            retry: RetryConfig::new(config.replication.max_attempts),
            transfer,
            state: RwLock::new(ReplicatorState::Idle),
            stats: RwLock::new(ReplicatorStats::default()),
        })
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The transfer collaborator.
    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// The ledger this replicator records into.
    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Gets the current state.
    pub fn state(&self) -> ReplicatorState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> ReplicatorStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: ReplicatorState) {
        *self.state.write() = state;
    }

    /// Runs one pass, recording into today's (local date) partition.
    pub fn run(&self) -> SyncResult<ReplicationReport> {
        self.run_on(Local::now().date_naive())
    }

    /// Runs one pass, recording confirmed files under `date`.
    ///
    /// A lock conflict is not an error: the report comes back with
    /// `skipped` set and the lock file untouched.
    pub fn run_on(&self, date: NaiveDate) -> SyncResult<ReplicationReport> {
        self.set_state(ReplicatorState::Locking);
        let guard = match self.locks.try_acquire(REPLICATE_LOCK) {
            Ok(guard) => guard,
            Err(e) if e.is_lock_held() => {
                info!(error = %e, "replication already running, skipping");
                self.set_state(ReplicatorState::Skipped);
                self.stats.write().runs_skipped += 1;
                return Ok(ReplicationReport {
                    skipped: true,
                    ..ReplicationReport::default()
                });
            }
            Err(e) => return Err(self.fail(e.into())),
        };

        let mut report = ReplicationReport {
            reclaimed_stale_lock: guard.was_reclaimed(),
            ..ReplicationReport::default()
        };

        match self.replicate(date, &mut report) {
            Ok(()) => {
                // The ledger is already durable; a failed release only leaves
                // a record the next run reclaims.
                if let Err(e) = guard.release() {
                    warn!(error = %e, "releasing replication lock failed");
                }
                self.set_state(ReplicatorState::Done);
                let mut stats = self.stats.write();
                stats.runs_completed += 1;
                stats.files_transferred += report.transferred as u64;
                stats.files_failed += report.failed as u64;
                stats.last_run = Some(Utc::now());
                Ok(report)
            }
            Err(e) => {
                drop(guard);
                Err(self.fail(e))
            }
        }
    }

    fn replicate(&self, date: NaiveDate, report: &mut ReplicationReport) -> SyncResult<()> {
        self.set_state(ReplicatorState::Scanning);
        let recorded = self.ledger.recorded_set()?;
        let pending: Vec<String> = self
            .store
            .staged_segments()?
            .into_iter()
            .map(|file| file.relative)
            .filter(|relative| !recorded.contains(relative))
            .collect();
        report.pending = pending.len();
        if pending.is_empty() {
            debug!("nothing pending");
            return Ok(());
        }

        self.set_state(ReplicatorState::Transferring);
        info!(pending = pending.len(), target = %self.target, "replicating staged segments");
        let (outcome, attempts) = self.transfer_with_retry(&pending)?;
        report.attempts = attempts;

        // Never record anything that was not asked for, and each file once.
        let mut requested: HashSet<&str> = pending.iter().map(String::as_str).collect();
        let confirmed: Vec<&str> = outcome
            .transferred
            .iter()
            .map(String::as_str)
            .filter(|path| requested.remove(path))
            .collect();

        self.set_state(ReplicatorState::Recording);
        self.ledger.record_success(date, &confirmed)?;
        report.transferred = confirmed.len();
        report.failed = pending.len().saturating_sub(confirmed.len());

        info!(
            transferred = report.transferred,
            failed = report.failed,
            date = %date,
            "replication recorded"
        );
        Ok(())
    }

    fn transfer_with_retry(&self, files: &[String]) -> SyncResult<(TransferOutcome, u32)> {
        let root = self.store.staging_root();
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }
            attempt += 1;

            match self.transfer.transfer(root, files, &self.target) {
                Ok(outcome) => return Ok((outcome, attempt)),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(attempt, error = %e, "transfer failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fail(&self, error: SyncError) -> SyncError {
        warn!(error = %error, class = %error.class(), "replication failed");
        self.set_state(ReplicatorState::Failed);
        self.stats.write().last_error = Some(error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{MockBehavior, MockTransfer};
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    const A: &str = "ROST1/2025-05-28/ROST1_20250528T120000.mkv";
    const B: &str = "ROST1/2025-05-28/ROST1_20250528T121000.mkv";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 29).unwrap()
    }

    fn setup(temp: &TempDir) -> PipelineConfig {
        let config = PipelineConfig::new(
            temp.path().join("live"),
            temp.path().join("staging"),
            temp.path().join("synced"),
            temp.path().join("locks"),
            "nas:/cameras",
        );
        for rel in [A, B] {
            let path = config.staging_root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, rel).unwrap();
        }
        config
    }

    fn replicator(config: &PipelineConfig, mock: MockTransfer) -> Replicator<MockTransfer> {
        Replicator::new(config, mock)
            .unwrap()
            .with_retry(RetryConfig::new(3).with_initial_delay(std::time::Duration::ZERO))
    }

    #[test]
    fn records_transferred_files_under_run_date() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let rep = replicator(&config, MockTransfer::new());

        let report = rep.run_on(today()).unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.transferred, 2);
        assert_eq!(rep.state(), ReplicatorState::Done);
        assert_eq!(rep.ledger().entries(today()).unwrap(), vec![A, B]);

        let call = &rep.transfer().calls()[0];
        assert_eq!(call.source_root, config.staging_root);
        assert_eq!(call.target, "nas:/cameras");
    }

    #[test]
    fn second_run_transfers_nothing() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let rep = replicator(&config, MockTransfer::new());
        rep.run_on(today()).unwrap();

        let again = rep.run_on(today()).unwrap();
        assert_eq!(again.pending, 0);
        assert_eq!(again.transferred, 0);
        assert_eq!(rep.transfer().call_count(), 1);
    }

    #[test]
    fn failed_transfer_records_nothing() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let mock = MockTransfer::new();
        mock.set_default(MockBehavior::Fail { retryable: false });
        let rep = replicator(&config, mock);

        assert!(rep.run_on(today()).is_err());
        assert_eq!(rep.state(), ReplicatorState::Failed);
        assert!(rep.ledger().partitions().unwrap().is_empty());
        assert!(rep.stats().last_error.is_some());
        // The lock was released.
        assert!(LockDir::new(&config.lock_dir).holder(REPLICATE_LOCK).unwrap().is_none());
    }

    #[test]
    fn retryable_failure_is_retried() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let mock = MockTransfer::new();
        mock.push_behavior(MockBehavior::Fail { retryable: true });
        let rep = replicator(&config, mock);

        let report = rep.run_on(today()).unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.transferred, 2);
        assert_eq!(rep.stats().retries, 1);
    }

    #[test]
    fn retries_are_bounded() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let mock = MockTransfer::new();
        mock.set_default(MockBehavior::Fail { retryable: true });
        let rep = replicator(&config, mock);

        assert!(rep.run_on(today()).is_err());
        assert_eq!(rep.transfer().call_count(), 3);
    }

    #[test]
    fn partial_transfer_records_only_confirmed() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let mock = MockTransfer::new();
        mock.push_behavior(MockBehavior::Partial([B.to_string()].into_iter().collect()));
        let rep = replicator(&config, mock);

        let report = rep.run_on(today()).unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(report.failed, 1);
        assert!(rep.ledger().is_recorded(A).unwrap());
        assert!(!rep.ledger().is_recorded(B).unwrap());

        let next = rep.run_on(today()).unwrap();
        assert_eq!(next.pending, 1);
        assert_eq!(rep.transfer().calls()[1].files, vec![B]);
    }

    #[test]
    fn overlapping_run_is_skipped() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);

        let inner = Arc::new(replicator(&config, MockTransfer::new()));
        let outer_mock = MockTransfer::new();
        let observed = Arc::new(parking_lot::Mutex::new(None));
        {
            let inner = Arc::clone(&inner);
            let observed = Arc::clone(&observed);
            outer_mock.set_hook(move || {
                *observed.lock() = Some(inner.run_on(today()).unwrap());
            });
        }
        let outer = replicator(&config, outer_mock);

        let report = outer.run_on(today()).unwrap();
        assert_eq!(report.transferred, 2);

        let skipped = observed.lock().clone().unwrap();
        assert!(skipped.skipped);
        assert_eq!(inner.transfer().call_count(), 0);
        assert_eq!(inner.state(), ReplicatorState::Skipped);
        assert!(LockDir::new(&config.lock_dir).path(REPLICATE_LOCK).exists());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let temp = tempdir().unwrap();
        let config = setup(&temp);
        fs::create_dir_all(&config.lock_dir).unwrap();
        fs::write(
            LockDir::new(&config.lock_dir).path(REPLICATE_LOCK),
            r#"{"token":"8c4f2a9e-3b1d-4c6e-9f0a-1b2c3d4e5f60","pid":999999,"host":"recorder-pi","acquired_at":"2025-05-28T12:00:00Z"}"#,
        )
        .unwrap();

        let rep = replicator(&config, MockTransfer::new());
        let report = rep.run_on(today()).unwrap();
        assert!(report.reclaimed_stale_lock);
        assert_eq!(report.transferred, 2);
    }

    #[test]
    fn ignores_unrequested_confirmations() {
        struct Overreporting;
        impl Transfer for Overreporting {
            fn transfer(
                &self,
                _source_root: &std::path::Path,
                files: &[String],
                _target: &str,
            ) -> SyncResult<TransferOutcome> {
                let mut transferred = files.to_vec();
                transferred.push("ROST9/2025-05-28/ROST9_20250528T000000.mkv".into());
                Ok(TransferOutcome {
                    transferred,
                    failed: Vec::new(),
                })
            }
        }

        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let rep = Replicator::new(&config, Overreporting).unwrap();
        let report = rep.run_on(today()).unwrap();
        assert_eq!(report.transferred, 2);
        assert!(!rep
            .ledger()
            .is_recorded("ROST9/2025-05-28/ROST9_20250528T000000.mkv")
            .unwrap());
    }

    #[test]
    fn duplicate_confirmations_are_counted_once() {
        struct Repeating;
        impl Transfer for Repeating {
            fn transfer(
                &self,
                _source_root: &std::path::Path,
                files: &[String],
                _target: &str,
            ) -> SyncResult<TransferOutcome> {
                let transferred = files.iter().chain(files).cloned().collect();
                Ok(TransferOutcome {
                    transferred,
                    failed: Vec::new(),
                })
            }
        }

        let temp = tempdir().unwrap();
        let config = setup(&temp);
        let rep = Replicator::new(&config, Repeating).unwrap();
        let report = rep.run_on(today()).unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(report.transferred, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(rep.ledger().entries(today()).unwrap(), vec![A, B]);
    }
}
