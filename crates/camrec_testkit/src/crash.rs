//! Crash recovery testing utilities.
//!
//! A crash is modelled by leaving the on-disk state a killed process would
//! have left, then running the affected component again and checking that
//! every segment ends up in exactly one place with its contents intact.

use crate::fixtures::{segment_bytes, TestLayout};
use camrec_core::{LockDir, Stager, REPLICATE_LOCK};
use camrec_store::{partial_path, SegmentName};
use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a staging move was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Killed before touching the segment.
    BeforeMove,
    /// Killed while copying; a truncated `.partial` exists next to the
    /// destination.
    DuringCopy,
    /// Killed after the copy finished but before it was renamed into place.
    AfterCopyBeforeRename,
    /// Killed after the destination was in place but before the source was
    /// removed; both copies exist.
    AfterRenameBeforeSourceDelete,
}

impl CrashPoint {
    /// Every crash point.
    pub const ALL: [CrashPoint; 4] = [
        CrashPoint::BeforeMove,
        CrashPoint::DuringCopy,
        CrashPoint::AfterCopyBeforeRename,
        CrashPoint::AfterRenameBeforeSourceDelete,
    ];
}

/// Result of a crash recovery test.
#[derive(Debug)]
pub struct CrashRecoveryResult {
    /// Whether recovery succeeded.
    pub passed: bool,
    /// Description of the test.
    pub description: String,
    /// Segments expected in the staging tree.
    pub expected_segments: usize,
    /// Segments actually found in the staging tree.
    pub actual_segments: usize,
    /// Error message if failed.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: impl Into<String>, segments: usize) -> Self {
        Self {
            passed: true,
            description: description.into(),
            expected_segments: segments,
            actual_segments: segments,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(
        description: impl Into<String>,
        expected: usize,
        actual: usize,
        error: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            description: description.into(),
            expected_segments: expected,
            actual_segments: actual,
            error: Some(error.into()),
        }
    }
}

/// Leaves the state a staging move of `live` would have left if killed at
/// `point`.
///
/// `live` must be an existing live segment of `layout`.
pub fn simulate_interrupted_stage(layout: &TestLayout, live: &Path, point: CrashPoint) {
    let store = layout.store();
    let name = segment_name(layout, live);
    let dest = store.staged_path(&name);
    let contents = fs::read(live).expect("Failed to read live segment");

    if point != CrashPoint::BeforeMove {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).expect("Failed to create staging dir");
        }
    }
    match point {
        CrashPoint::BeforeMove => {}
        CrashPoint::DuringCopy => {
            fs::write(partial_path(&dest), &contents[..contents.len() / 2])
                .expect("Failed to write partial copy");
        }
        CrashPoint::AfterCopyBeforeRename => {
            fs::write(partial_path(&dest), &contents).expect("Failed to write partial copy");
        }
        CrashPoint::AfterRenameBeforeSourceDelete => {
            fs::write(&dest, &contents).expect("Failed to write destination");
        }
    }
}

/// Leaves the lock record of a replicator that was killed mid-run.
///
/// No process holds the lock afterwards; only the record remains.
pub fn simulate_killed_replicator(layout: &TestLayout) -> PathBuf {
    let locks = LockDir::new(&layout.config().lock_dir);
    let path = locks.path(REPLICATE_LOCK);
    fs::create_dir_all(&layout.config().lock_dir).expect("Failed to create lock dir");
    fs::write(
        &path,
        r#"{"token":"00000000-0000-0000-0000-000000000000","pid":4242,"host":"crashed-host","acquired_at":"2025-05-28T12:00:00Z"}"#,
    )
    .expect("Failed to write lock record");
    path
}

/// Checks that every named segment exists exactly once, in the live or the
/// staging tree, with its original contents, and that no `.partial` copy
/// is left in the staging tree.
pub fn verify_exactly_once(layout: &TestLayout, names: &[SegmentName]) -> Result<(), String> {
    let store = layout.store();
    let extension = &layout.config().segment.extension;
    for name in names {
        let live = layout
            .config()
            .live_root
            .join(&name.station)
            .join(name.file_name(extension));
        let staged = store.staged_path(name);
        let found: Vec<_> = [&live, &staged].into_iter().filter(|p| p.exists()).collect();
        match found.as_slice() {
            [path] => {
                let contents =
                    fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
                if contents != segment_bytes(name) {
                    return Err(format!("{name}: contents changed at {}", path.display()));
                }
            }
            [] => return Err(format!("{name}: lost")),
            _ => return Err(format!("{name}: present in both live and staging")),
        }
    }
    let partials: Vec<_> = layout
        .staged_files()
        .into_iter()
        .filter(|f| f.ends_with(camrec_store::PARTIAL_SUFFIX))
        .collect();
    if !partials.is_empty() {
        return Err(format!("leftover partial copies: {partials:?}"));
    }
    Ok(())
}

/// Harness that stages segments after a simulated crash.
pub struct CrashHarness {
    layout: TestLayout,
}

impl CrashHarness {
    /// Creates a harness over a fresh layout.
    pub fn new() -> Self {
        Self {
            layout: TestLayout::new(),
        }
    }

    /// The layout under test.
    pub fn layout(&self) -> &TestLayout {
        &self.layout
    }

    /// Writes closed segments, interrupts the staging of the first one at
    /// `point`, runs the stager once more, and checks the result.
    pub fn test_stage_recovery(
        &self,
        point: CrashPoint,
        station: &str,
        starts: &[NaiveDateTime],
    ) -> CrashRecoveryResult {
        let description = format!("{point:?} with {} segment(s)", starts.len());
        let closed = self.layout.config().closure_threshold() + Duration::from_secs(60);

        let mut names = Vec::new();
        let mut paths = Vec::new();
        for start in starts {
            let name = SegmentName::new(station, *start);
            if names.contains(&name) {
                continue;
            }
            paths.push(self.layout.write_segment(station, *start, closed));
            names.push(name);
        }
        if let Some(first) = paths.first() {
            simulate_interrupted_stage(&self.layout, first, point);
        }

        let report = match Stager::new(self.layout.config()).run() {
            Ok(report) => report,
            Err(e) => return CrashRecoveryResult::fail(description, names.len(), 0, e.to_string()),
        };
        let actual = self
            .layout
            .store()
            .staged_segments()
            .map(|files| files.len())
            .unwrap_or(0);
        if !report.is_clean() {
            return CrashRecoveryResult::fail(
                description,
                names.len(),
                actual,
                format!("stager reported failures: {:?}", report.failures),
            );
        }
        if let Err(e) = verify_exactly_once(&self.layout, &names) {
            return CrashRecoveryResult::fail(description, names.len(), actual, e);
        }
        if actual != names.len() {
            return CrashRecoveryResult::fail(
                description,
                names.len(),
                actual,
                "not every closed segment was staged",
            );
        }
        CrashRecoveryResult::pass(description, names.len())
    }
}

impl Default for CrashHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn segment_name(layout: &TestLayout, live: &Path) -> SegmentName {
    live.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| SegmentName::parse(n, &layout.config().segment.extension))
        .expect("Not a live segment path")
}
