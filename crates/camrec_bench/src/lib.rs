//! Benchmark utilities.

#![warn(missing_docs)]

use camrec_core::SyncLedger;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;

/// First day of generated data.
pub fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 5, 1).expect("valid date")
}

/// Start times of `count` consecutive 600 s segments beginning on `date`.
pub fn segment_starts(date: NaiveDate, count: usize) -> Vec<NaiveDateTime> {
    let midnight = date.and_hms_opt(0, 0, 0).expect("valid time");
    (0..count as i64)
        .map(|i| midnight + Duration::seconds(i * 600))
        .collect()
}

/// Ledger-style relative path of a segment.
pub fn relative_path(station: &str, start: NaiveDateTime) -> String {
    format!(
        "{station}/{}/{station}_{}.mkv",
        start.format("%Y-%m-%d"),
        start.format("%Y%m%dT%H%M%S")
    )
}

/// Fills `ledger` with `days` partitions of `per_day` entries for `stations`.
///
/// Returns every recorded path.
pub fn populate_ledger(
    ledger: &SyncLedger,
    stations: &[&str],
    days: u32,
    per_day: usize,
) -> Vec<String> {
    let mut all = Vec::new();
    for day in 0..days {
        let date = base_date() + Duration::days(i64::from(day));
        let mut paths = Vec::new();
        for station in stations {
            for start in segment_starts(date, per_day) {
                paths.push(relative_path(station, start));
            }
        }
        ledger
            .record_success(date, &paths)
            .expect("Failed to populate ledger");
        all.extend(paths);
    }
    all
}

/// Writes one staged file per path under `root`.
pub fn populate_staging(root: &Path, paths: &[String], size: usize) {
    let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
    for relative in paths {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create staging dir");
        }
        fs::write(&path, &data).expect("Failed to write staged file");
    }
}
