//! Segment identity and lifecycle.
//!
//! A segment file name encodes its station and start time losslessly:
//!
//! ```text
//! ROST1_20250528T120000.mkv
//! ^^^^^ ^^^^^^^^^^^^^^^ ^^^
//! |     |               extension
//! |     start (%Y%m%dT%H%M%S)
//! station
//! ```
//!
//! Station identifiers may themselves contain `_`, so the name is split on
//! the last underscore.

use crate::error::{StoreError, StoreResult};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// strftime pattern used by the producer for the start timestamp.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Default segment file extension.
pub const DEFAULT_EXTENSION: &str = "mkv";

/// Suffix appended to in-progress copies.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Checks that a station identifier can be used as a single path component.
pub fn validate_station_id(station: &str) -> StoreResult<()> {
    let bad = station.is_empty()
        || station == "."
        || station == ".."
        || station.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidStation(station.to_string()));
    }
    Ok(())
}

/// The (station, start timestamp) pair a segment file name encodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentName {
    /// Station identifier.
    pub station: String,
    /// Start of the recorded window, to-the-second.
    pub start: NaiveDateTime,
}

impl SegmentName {
    /// Creates a segment name.
    pub fn new(station: impl Into<String>, start: NaiveDateTime) -> Self {
        Self {
            station: station.into(),
            start,
        }
    }

    /// Parses a file name such as `ROST1_20250528T120000.mkv`.
    ///
    /// Returns `None` for anything that is not a segment with the given
    /// extension, including `.partial` copies.
    pub fn parse(file_name: &str, extension: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
        let (station, stamp) = stem.rsplit_once('_')?;
        if validate_station_id(station).is_err() {
            return None;
        }
        let start = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self::new(station, start))
    }

    /// Formats the file name for this segment.
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}.{}",
            self.station,
            self.start.format(TIMESTAMP_FORMAT),
            extension
        )
    }

    /// The calendar date of the segment's own start time.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    /// Path of this segment relative to the staging root, `/`-separated.
    ///
    /// This is also the key recorded in the sync ledger.
    pub fn staged_relative(&self, extension: &str) -> String {
        format!(
            "{}/{}/{}",
            self.station,
            self.date().format("%Y-%m-%d"),
            self.file_name(extension)
        )
    }
}

impl fmt::Display for SegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.station, self.start.format(TIMESTAMP_FORMAT))
    }
}

/// Where a segment is in its life.
///
/// Segments only move forward: `Recording → Staged → Replicated → Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// The producer may still be appending to the file.
    Recording,
    /// Closed and moved into the staging tree.
    Staged,
    /// Transfer confirmed and recorded in the ledger.
    Replicated,
    /// Local copy removed.
    Deleted,
}

impl LifecycleState {
    /// Returns true if `next` is the single legal successor of `self`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Recording, LifecycleState::Staged)
                | (LifecycleState::Staged, LifecycleState::Replicated)
                | (LifecycleState::Replicated, LifecycleState::Deleted)
        )
    }

    /// Returns true if the file content may still change.
    pub fn is_mutable(self) -> bool {
        self == LifecycleState::Recording
    }
}

/// A segment file observed on disk.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Station and start time.
    pub name: SegmentName,
    /// Current location.
    pub path: PathBuf,
    /// Last modification time, the producer's liveness signal.
    pub modified: SystemTime,
    /// Lifecycle state implied by the tree the file was found in.
    pub state: LifecycleState,
}

impl Segment {
    /// Age of the file relative to `now`; zero if the mtime is in the future.
    pub fn age(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }

    /// Station identifier.
    pub fn station(&self) -> &str {
        &self.name.station
    }
}
