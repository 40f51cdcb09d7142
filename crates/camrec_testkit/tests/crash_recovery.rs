//! Crash recovery tests: rerunning a component after it was killed
//! converges without duplicating or losing segments.

use camrec_core::{Reclaimer, Stager};
use camrec_store::SegmentName;
use camrec_sync::{MockTransfer, Replicator};
use camrec_testkit::generators::{crash_point, segment_starts};
use camrec_testkit::prelude::*;
use chrono::NaiveDate;
use proptest::prelude::*;
use std::fs;
use std::time::Duration;

fn may_28() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 28).unwrap()
}

#[test]
fn stage_recovers_from_every_crash_point() {
    let starts: Vec<_> = (0..3)
        .map(|i| may_28().and_hms_opt(10 + i, 0, 0).unwrap())
        .collect();
    for point in CrashPoint::ALL {
        let harness = CrashHarness::new();
        let result = harness.test_stage_recovery(point, "ROST1", &starts);
        assert!(result.passed, "{}: {:?}", result.description, result.error);
        assert_eq!(result.actual_segments, 3);
    }
}

#[test]
fn repeated_staging_after_crash_is_stable() {
    let harness = CrashHarness::new();
    let start = may_28().and_hms_opt(12, 0, 0).unwrap();
    let result =
        harness.test_stage_recovery(CrashPoint::AfterRenameBeforeSourceDelete, "ROST1", &[start]);
    assert!(result.passed, "{:?}", result.error);

    let layout = harness.layout();
    let before = layout.staged_files();
    let report = Stager::new(layout.config()).run().unwrap();
    assert_eq!(report.staged, 0);
    assert_eq!(layout.staged_files(), before);
    verify_exactly_once(layout, &[SegmentName::new("ROST1", start)]).unwrap();
}

#[test]
fn replication_after_unrecorded_transfer_records_everything() {
    // Killed after the transfer finished but before the ledger append:
    // the remote has the files, the ledger does not.
    let layout = TestLayout::new();
    let relative = "ROST1/2025-05-28/ROST1_20250528T120000.mkv";
    let staged = layout.write_staged(relative);
    let remote = layout.remote_dir().join(relative);
    fs::create_dir_all(remote.parent().unwrap()).unwrap();
    fs::copy(&staged, &remote).unwrap();

    let reclaimed = Reclaimer::new(layout.config()).unwrap().run().unwrap();
    assert_eq!(reclaimed.deleted, 0);
    assert!(staged.exists());

    let replicator = Replicator::new(layout.config(), MockTransfer::copying()).unwrap();
    let report = replicator.run_on(may_28()).unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(layout.ledger().entries(may_28()).unwrap(), vec![relative]);

    let reclaimed = Reclaimer::new(layout.config()).unwrap().run().unwrap();
    assert_eq!(reclaimed.deleted, 1);
    assert_eq!(layout.remote_files(), vec![relative]);
}

#[test]
fn killed_replicator_lock_does_not_block_forever() {
    let layout = TestLayout::new();
    layout.write_staged("ROST1/2025-05-28/ROST1_20250528T120000.mkv");
    let lock = simulate_killed_replicator(&layout);

    let replicator = Replicator::new(layout.config(), MockTransfer::new()).unwrap();
    let report = replicator.run_on(may_28()).unwrap();
    assert!(report.reclaimed_stale_lock);
    assert!(!report.skipped);

    // The lock file stays, emptied, for the next holder.
    assert!(lock.exists());
    assert!(fs::read(&lock).unwrap().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn no_segment_is_lost_or_duplicated(
        point in crash_point(),
        starts in segment_starts(6),
    ) {
        let harness = CrashHarness::new();
        let result = harness.test_stage_recovery(point, "ROST1", &starts);
        prop_assert!(result.passed, "{}: {:?}", result.description, result.error);
        prop_assert_eq!(result.actual_segments, starts.len());
        prop_assert!(harness.layout().live_files().is_empty());
    }

    #[test]
    fn open_segments_survive_a_crashed_stage(
        point in crash_point(),
        age in 0u64..1100,
    ) {
        let harness = CrashHarness::new();
        let layout = harness.layout();
        let start = may_28().and_hms_opt(9, 0, 0).unwrap();
        let open = layout.write_segment("ROST2", start, Duration::from_secs(age));

        let result = harness.test_stage_recovery(
            point,
            "ROST1",
            &[may_28().and_hms_opt(8, 0, 0).unwrap()],
        );
        prop_assert!(result.passed, "{:?}", result.error);
        prop_assert!(open.exists());
        verify_exactly_once(layout, &[SegmentName::new("ROST2", start)])
            .map_err(TestCaseError::fail)?;
    }
}
