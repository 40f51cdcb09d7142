//! The sync ledger: append-only record of confirmed replications.
//!
//! ```text
//! <ledger_dir>/
//! ├─ 2025-05-27.synced
//! └─ 2025-05-28.synced     # one relative path per line
//! ```
//!
//! Partitions are keyed by the date the replication happened, not by the
//! segment's own date, so replication lag never rewrites an older
//! partition. Entries are never removed: membership in any partition is
//! proof the file reached the remote target.
//!
//! ## Crash safety
//!
//! Appends hold an exclusive advisory lock on the partition file, write all
//! new lines in one call, and fsync. A crash mid-append can leave a torn
//! final line without its newline; readers ignore it, and the next append
//! terminates it first so it never merges with a new entry.

use crate::error::CoreResult;
use chrono::NaiveDate;
use fs2::FileExt;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension of ledger partitions.
pub const PARTITION_EXTENSION: &str = "synced";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date-partitioned, append-only record of replicated relative paths.
#[derive(Debug, Clone)]
pub struct SyncLedger {
    dir: PathBuf,
    scan_window: Option<u32>,
}

impl SyncLedger {
    /// Opens the ledger directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            scan_window: None,
        })
    }

    /// Restricts membership checks to the newest `days` partitions.
    #[must_use]
    pub fn with_scan_window(mut self, days: Option<u32>) -> Self {
        self.scan_window = days;
        self
    }

    /// Ledger directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the partition for `date`.
    #[must_use]
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{PARTITION_EXTENSION}", date.format(DATE_FORMAT)))
    }

    /// Records that `paths` were replicated on `date`.
    ///
    /// Paths already present in that partition are skipped, so recording
    /// the same batch twice is harmless. Returns the number of new entries.
    pub fn record_success<S: AsRef<str>>(&self, date: NaiveDate, paths: &[S]) -> CoreResult<usize> {
        if paths.is_empty() {
            return Ok(0);
        }

        let path = self.partition_path(date);
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        file.lock_exclusive()?;
        let result = append_locked(&mut file, paths);
        if let Err(e) = FileExt::unlock(&file) {
            debug!(path = %path.display(), error = %e, "ledger unlock failed");
        }

        let appended = result?;
        debug!(date = %date, appended, "ledger partition updated");
        Ok(appended)
    }

    /// Partition dates present, oldest first.
    pub fn partitions(&self) -> CoreResult<Vec<NaiveDate>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dates = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(PARTITION_EXTENSION).and_then(|s| s.strip_suffix('.'))
            else {
                continue;
            };
            match NaiveDate::parse_from_str(stem, DATE_FORMAT) {
                Ok(date) => {
                    dates.insert(date);
                }
                Err(_) => warn!(file = name, "ignoring unrecognized file in ledger directory"),
            }
        }
        Ok(dates.into_iter().collect())
    }

    /// Complete entries of one partition, in append order.
    pub fn entries(&self, date: NaiveDate) -> CoreResult<Vec<String>> {
        match fs::read(self.partition_path(date)) {
            Ok(bytes) => Ok(parse_partition(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every recorded path within the scan window.
    ///
    /// Entries only ever accumulate, so a snapshot taken before acting is
    /// safe to act on: it can miss a newer entry but never contain a false one.
    pub fn recorded_set(&self) -> CoreResult<HashSet<String>> {
        let mut dates = self.partitions()?;
        if let Some(window) = self.scan_window {
            let keep = window as usize;
            if dates.len() > keep {
                dates.drain(..dates.len() - keep);
            }
        }

        let mut recorded = HashSet::new();
        for date in dates {
            recorded.extend(self.entries(date)?);
        }
        Ok(recorded)
    }

    /// Returns true if `relative_path` appears in any partition in the window.
    pub fn is_recorded(&self, relative_path: &str) -> CoreResult<bool> {
        Ok(self.recorded_set()?.contains(relative_path))
    }
}

fn append_locked<S: AsRef<str>>(file: &mut File, paths: &[S]) -> CoreResult<usize> {
    let mut existing = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut existing)?;
    let text = String::from_utf8_lossy(&existing);
    let present: HashSet<String> = parse_partition(&text).into_iter().collect();

    let mut buf = String::new();
    if !existing.is_empty() && !existing.ends_with(b"\n") {
        buf.push('\n');
    }
    let mut appended = 0;
    let mut batch = HashSet::new();
    for path in paths {
        let path = path.as_ref().trim();
        if path.is_empty() || present.contains(path) || !batch.insert(path) {
            continue;
        }
        buf.push_str(path);
        buf.push('\n');
        appended += 1;
    }
    if appended == 0 {
        return Ok(0);
    }

    file.write_all(buf.as_bytes())?;
    file.sync_data()?;
    Ok(appended)
}

/// Splits partition text into entries, dropping blank lines and a torn tail.
fn parse_partition(text: &str) -> Vec<String> {
    let complete = match text.rfind('\n') {
        Some(idx) => &text[..idx],
        None => "",
    };
    complete
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    #[test]
    fn records_and_reads_back() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path().join("synced")).unwrap();

        let path = "ROST1/2025-05-28/ROST1_20250528T120000.mkv";
        assert!(!ledger.is_recorded(path).unwrap());
        assert_eq!(ledger.record_success(day(28), &[path]).unwrap(), 1);
        assert!(ledger.is_recorded(path).unwrap());
        assert_eq!(ledger.entries(day(28)).unwrap(), vec![path]);
        assert!(ledger.partition_path(day(28)).ends_with("2025-05-28.synced"));
    }

    #[test]
    fn duplicate_appends_are_skipped() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path()).unwrap();

        let batch = ["A/2025-05-28/A_20250528T120000.mkv", "A/2025-05-28/A_20250528T121000.mkv"];
        assert_eq!(ledger.record_success(day(28), &batch).unwrap(), 2);
        assert_eq!(ledger.record_success(day(28), &batch).unwrap(), 0);
        assert_eq!(ledger.entries(day(28)).unwrap().len(), 2);
    }

    #[test]
    fn membership_spans_partitions() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path()).unwrap();
        ledger.record_success(day(27), &["a.mkv"]).unwrap();
        ledger.record_success(day(28), &["b.mkv"]).unwrap();

        let recorded = ledger.recorded_set().unwrap();
        assert!(recorded.contains("a.mkv"));
        assert!(recorded.contains("b.mkv"));
        assert_eq!(ledger.partitions().unwrap(), vec![day(27), day(28)]);
    }

    #[test]
    fn scan_window_limits_partitions() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path())
            .unwrap()
            .with_scan_window(Some(1));
        ledger.record_success(day(27), &["old.mkv"]).unwrap();
        ledger.record_success(day(28), &["new.mkv"]).unwrap();

        assert!(!ledger.is_recorded("old.mkv").unwrap());
        assert!(ledger.is_recorded("new.mkv").unwrap());
    }

    #[test]
    fn torn_tail_is_ignored_then_isolated() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path()).unwrap();
        fs::write(ledger.partition_path(day(28)), "a.mkv\nb.m").unwrap();

        assert_eq!(ledger.entries(day(28)).unwrap(), vec!["a.mkv"]);

        ledger.record_success(day(28), &["c.mkv"]).unwrap();
        let raw = fs::read_to_string(ledger.partition_path(day(28))).unwrap();
        assert_eq!(raw, "a.mkv\nb.m\nc.mkv\n");
        assert!(ledger.is_recorded("c.mkv").unwrap());
    }

    #[test]
    fn ignores_foreign_files() {
        let temp = tempdir().unwrap();
        let ledger = SyncLedger::open(temp.path()).unwrap();
        fs::write(temp.path().join("notes.txt"), "x\n").unwrap();
        fs::write(temp.path().join("yesterday.synced"), "x\n").unwrap();
        assert!(ledger.partitions().unwrap().is_empty());
    }

    #[test]
    fn accepts_original_partition_format() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("2025-05-28.synced"),
            "ROST1/2025-05-28/ROST1_20250528T120000.mkv\n\nROST2/2025-05-28/ROST2_20250528T120000.mkv\n",
        )
        .unwrap();
        let ledger = SyncLedger::open(temp.path()).unwrap();
        assert_eq!(ledger.entries(day(28)).unwrap().len(), 2);
    }

    proptest! {
        #[test]
        fn membership_is_monotonic(batches in prop::collection::vec(
            prop::collection::vec("[A-Z]{1,4}/2025-05-2[0-9]/[a-z]{1,8}\\.mkv", 0..6),
            1..6,
        )) {
            let temp = tempdir().unwrap();
            let ledger = SyncLedger::open(temp.path()).unwrap();
            let mut seen = HashSet::new();
            for (i, batch) in batches.iter().enumerate() {
                ledger.record_success(day(20 + i as u32), batch).unwrap();
                seen.extend(batch.iter().cloned());
                let recorded = ledger.recorded_set().unwrap();
                for path in &seen {
                    prop_assert!(recorded.contains(path));
                }
                prop_assert_eq!(recorded.len(), seen.len());
            }
        }
    }
}
