//! Property-based test generators.
//!
//! Strategies for generating station ids, segment start times, ages and
//! crash points with proptest.

use crate::crash::CrashPoint;
use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::time::Duration;

/// Generates a valid station id such as `ROST1` or `cam-07`.
pub fn station_id() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[A-Za-z][A-Za-z0-9-]{0,7}")
        .expect("Invalid regex")
}

/// Generates a segment start time on a whole second within 2024-2026.
pub fn segment_start() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..3 * 365 * 86_400).prop_map(|offset| {
        let epoch = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("Invalid epoch");
        epoch + chrono::Duration::seconds(offset)
    })
}

/// Generates distinct segment start times on a 600 s grid.
pub fn segment_starts(max: usize) -> impl Strategy<Value = Vec<NaiveDateTime>> {
    proptest::collection::btree_set(0i64..1000, 1..=max).prop_map(|slots| {
        let epoch = NaiveDate::from_ymd_opt(2025, 5, 20)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("Invalid epoch");
        slots
            .into_iter()
            .map(|slot| epoch + chrono::Duration::seconds(slot * 600))
            .collect()
    })
}

/// Generates a segment age, at most two hours.
pub fn segment_age() -> impl Strategy<Value = Duration> {
    (0u64..7200).prop_map(Duration::from_secs)
}

/// Generates a crash point.
pub fn crash_point() -> impl Strategy<Value = CrashPoint> {
    prop_oneof![
        Just(CrashPoint::BeforeMove),
        Just(CrashPoint::DuringCopy),
        Just(CrashPoint::AfterCopyBeforeRename),
        Just(CrashPoint::AfterRenameBeforeSourceDelete),
    ]
}
