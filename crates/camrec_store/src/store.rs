//! The segment store: live and staging trees.
//!
//! ```text
//! <live_root>/
//! └─ <STATION>/
//!    └─ <STATION>_<YYYYMMDD>T<HHMMSS>.<ext>     # written by the producer
//!
//! <staging_root>/
//! └─ <STATION>/
//!    └─ <YYYY-MM-DD>/
//!       └─ <STATION>_<YYYYMMDD>T<HHMMSS>.<ext>  # closed, awaiting replication
//! ```

use crate::error::{StoreError, StoreResult};
use crate::ops::{self, MoveOutcome};
use crate::segment::{validate_station_id, LifecycleState, Segment, SegmentName};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// A segment found under the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the staging root, `/`-separated; the ledger key.
    pub relative: String,
    /// Station and start time parsed from the file name.
    pub name: SegmentName,
}

/// Enumeration, move, and delete over the live and staging trees.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    live_root: PathBuf,
    staging_root: PathBuf,
    extension: String,
}

impl SegmentStore {
    /// Creates a store over the given roots.
    pub fn new(
        live_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            live_root: live_root.into(),
            staging_root: staging_root.into(),
            extension: extension.into(),
        }
    }

    /// Root of the live recording tree.
    #[must_use]
    pub fn live_root(&self) -> &Path {
        &self.live_root
    }

    /// Root of the staging tree.
    #[must_use]
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Segment file extension.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Directory the producer for `station` writes into.
    pub fn station_dir(&self, station: &str) -> StoreResult<PathBuf> {
        validate_station_id(station)?;
        Ok(self.live_root.join(station))
    }

    /// Station directories present in the live tree, sorted.
    pub fn list_stations(&self) -> StoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.live_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::MissingRoot {
                    path: self.live_root.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let mut stations = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_station_id(name).is_ok() {
                    stations.push(name.to_string());
                }
            }
        }
        stations.sort();
        Ok(stations)
    }

    /// All segments in a station's live directory, ordered by start time.
    ///
    /// A station without a directory has no segments.
    pub fn list_segments(&self, station: &str) -> StoreResult<Vec<Segment>> {
        let dir = self.station_dir(station)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(name) = SegmentName::parse(&file_name, &self.extension) else {
                continue;
            };
            if name.station != station {
                debug!(station, file = %file_name, "ignoring segment of another station");
                continue;
            }
            // The file may vanish between listing and stat; skip it.
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            segments.push(Segment {
                name,
                path: entry.path(),
                modified: meta.modified()?,
                state: LifecycleState::Recording,
            });
        }
        segments.sort_by(|a, b| a.name.start.cmp(&b.name.start));
        Ok(segments)
    }

    /// Segments the producer is provably no longer appending to.
    ///
    /// A segment counts as closed once its mtime is at least `closure`
    /// old; `closure` should be a conservative multiple of the producer's
    /// rotation interval so a file mid-rotation is never picked up.
    pub fn list_closed_segments(
        &self,
        station: &str,
        now: SystemTime,
        closure: Duration,
    ) -> StoreResult<Vec<Segment>> {
        Ok(self
            .list_segments(station)?
            .into_iter()
            .filter(|segment| segment.age(now) >= closure)
            .collect())
    }

    /// The most recently modified segment for a station.
    ///
    /// Always read fresh from disk.
    pub fn newest_segment(&self, station: &str) -> StoreResult<Option<Segment>> {
        Ok(self
            .list_segments(station)?
            .into_iter()
            .max_by_key(|segment| segment.modified))
    }

    /// Where `name` lives once staged.
    pub fn staged_path(&self, name: &SegmentName) -> PathBuf {
        self.staging_root
            .join(&name.station)
            .join(name.date().format("%Y-%m-%d").to_string())
            .join(name.file_name(&self.extension))
    }

    /// Moves a live segment into the staging tree.
    pub fn stage(&self, segment: &Segment) -> StoreResult<MoveOutcome> {
        let dest = self.staged_path(&segment.name);
        ops::move_segment(&segment.path, &dest)
    }

    /// Every segment under the staging root, sorted by relative path.
    pub fn staged_segments(&self) -> StoreResult<Vec<StagedFile>> {
        walk_segments(&self.staging_root, &self.extension)
    }

    /// Deletes a staged file and prunes its emptied parents.
    ///
    /// Returns `false` if the file was already gone.
    pub fn delete_staged(&self, file: &StagedFile) -> StoreResult<bool> {
        ops::delete_segment(&file.path, &self.staging_root)
    }

    /// Removes empty directories left under the staging root.
    pub fn prune_staging(&self) -> StoreResult<usize> {
        ops::prune_empty_dirs(&self.staging_root)
    }
}

/// Every segment file below `root`, sorted by relative path.
///
/// Non-segment files, `.partial` copies included, are skipped. A missing
/// root yields nothing.
pub fn walk_segments(root: &Path, extension: &str) -> StoreResult<Vec<StagedFile>> {
    let mut files = Vec::new();
    match walk(root, &mut Vec::new(), extension, &mut files) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn walk(
    dir: &Path,
    prefix: &mut Vec<String>,
    extension: &str,
    out: &mut Vec<StagedFile>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(component) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            prefix.push(component);
            let result = walk(&entry.path(), prefix, extension, out);
            prefix.pop();
            match result {
                // Pruned concurrently by another run.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                other => other?,
            }
        } else if file_type.is_file() {
            let Some(name) = SegmentName::parse(&component, extension) else {
                continue;
            };
            let mut relative = prefix.join("/");
            if !relative.is_empty() {
                relative.push('/');
            }
            relative.push_str(&component);
            out.push(StagedFile {
                path: entry.path(),
                relative,
                name,
            });
        }
    }
    Ok(())
}
