//! Stager: moves closed segments from the live tree into staging.
//!
//! Takes no lock. It only touches segments old enough that no producer is
//! still appending to them, and every move re-checks the source first, so
//! two overlapping runs at worst race to a no-op.

use crate::config::PipelineConfig;
use crate::error::{CoreError, CoreResult, Failure};
use camrec_store::{MoveOutcome, SegmentStore};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Outcome of one stager pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Stations examined.
    pub stations: usize,
    /// Segments moved into staging by this pass.
    pub staged: usize,
    /// Segments an earlier, interrupted pass had already moved.
    pub already_staged: usize,
    /// Per-station or per-file failures; the pass continued past them.
    pub failures: Vec<Failure>,
}

impl StageReport {
    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Moves closed segments into the staging tree.
#[derive(Debug, Clone)]
pub struct Stager {
    store: SegmentStore,
    configured: Vec<String>,
    closure: Duration,
}

impl Stager {
    /// Creates a stager from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            store: config.segment_store(),
            configured: config.stations.iter().map(|s| s.id.clone()).collect(),
            closure: config.closure_threshold(),
        }
    }

    /// The store this stager operates on.
    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Runs one pass against the current time.
    pub fn run(&self) -> CoreResult<StageReport> {
        self.run_at(SystemTime::now())
    }

    /// Runs one pass, judging closure relative to `now`.
    ///
    /// Fails only if the live root itself is unusable.
    pub fn run_at(&self, now: SystemTime) -> CoreResult<StageReport> {
        let mut stations: BTreeSet<String> = self.store.list_stations()?.into_iter().collect();
        stations.extend(self.configured.iter().cloned());

        let mut report = StageReport {
            stations: stations.len(),
            ..StageReport::default()
        };
        for station in &stations {
            self.stage_station(station, now, &mut report);
        }

        info!(
            stations = report.stations,
            staged = report.staged,
            already_staged = report.already_staged,
            failures = report.failures.len(),
            "stage pass complete"
        );
        Ok(report)
    }

    fn stage_station(&self, station: &str, now: SystemTime, report: &mut StageReport) {
        let closed = match self.store.list_closed_segments(station, now, self.closure) {
            Ok(closed) => closed,
            Err(e) => {
                let e = CoreError::from(e);
                warn!(station, error = %e, class = %e.class(), "cannot list segments");
                report.failures.push(Failure::new(station, &e));
                return;
            }
        };
        debug!(station, closed = closed.len(), "closed segments found");

        for segment in &closed {
            match self.store.stage(segment) {
                Ok(MoveOutcome::AlreadySatisfied) => report.already_staged += 1,
                Ok(MoveOutcome::Completed) => {
                    debug!(station, path = %segment.path.display(), "finished interrupted move");
                    report.staged += 1;
                }
                Ok(MoveOutcome::Renamed | MoveOutcome::Copied) => report.staged += 1,
                Err(e) => {
                    let e = CoreError::from(e);
                    warn!(station, path = %segment.path.display(), error = %e, "staging failed");
                    report
                        .failures
                        .push(Failure::new(segment.path.display().to_string(), &e));
                }
            }
        }
    }
}
