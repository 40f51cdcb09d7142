//! Test fixtures: a throwaway pipeline layout on disk.

use camrec_core::{PipelineConfig, StationConfig, SyncLedger};
use camrec_store::{SegmentName, SegmentStore};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Replication target used by every fixture; a local directory so copying
/// transfers can be inspected.
pub const REMOTE_DIR: &str = "remote";

/// A complete pipeline layout under a temporary directory.
///
/// The live root exists from the start; the staging tree, ledger and lock
/// directories are left for the components to create. The directory is
/// removed when the layout is dropped.
pub struct TestLayout {
    _temp_dir: TempDir,
    root: PathBuf,
    config: PipelineConfig,
}

impl TestLayout {
    /// Creates a layout with default cadence (600 s rotation, 1200 s
    /// closure and staleness thresholds).
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let config = PipelineConfig::new(
            root.join("live"),
            root.join("staging"),
            root.join("synced"),
            root.join("locks"),
            root.join(REMOTE_DIR).to_string_lossy().into_owned(),
        );
        fs::create_dir_all(&config.live_root).expect("Failed to create live root");
        Self {
            _temp_dir: temp_dir,
            root,
            config,
        }
    }

    /// Adds an expected station to the configuration.
    #[must_use]
    pub fn with_station(mut self, station: &str) -> Self {
        self.config = self.config.with_station(StationConfig::new(station));
        self
    }

    /// Replaces the configuration, keeping the layout's paths.
    #[must_use]
    pub fn map_config(mut self, f: impl FnOnce(PipelineConfig) -> PipelineConfig) -> Self {
        self.config = f(self.config);
        self
    }

    /// Root of the temporary directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pipeline configuration over this layout.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Segment store over this layout.
    pub fn store(&self) -> SegmentStore {
        self.config.segment_store()
    }

    /// Ledger over this layout.
    pub fn ledger(&self) -> SyncLedger {
        SyncLedger::open(&self.config.ledger_dir).expect("Failed to open ledger")
    }

    /// Local directory standing in for the replication target.
    pub fn remote_dir(&self) -> PathBuf {
        self.root.join(REMOTE_DIR)
    }

    /// Writes a live segment starting at `start` whose mtime is `age` old.
    pub fn write_segment(&self, station: &str, start: NaiveDateTime, age: Duration) -> PathBuf {
        let name = SegmentName::new(station, start);
        let dir = self.config.live_root.join(station);
        fs::create_dir_all(&dir).expect("Failed to create station dir");
        let path = dir.join(name.file_name(&self.config.segment.extension));
        fs::write(&path, segment_bytes(&name)).expect("Failed to write segment");
        set_age(&path, age);
        path
    }

    /// Writes a live segment whose start time is its own mtime, `age` ago.
    pub fn write_segment_aged(&self, station: &str, age: Duration) -> PathBuf {
        self.write_segment_modified(station, SystemTime::now() - age)
    }

    /// Writes a live segment last modified, and started, at `mtime`.
    pub fn write_segment_modified(&self, station: &str, mtime: SystemTime) -> PathBuf {
        let start = DateTime::<Utc>::from(mtime).naive_utc();
        let path = self.write_segment(station, start, Duration::ZERO);
        set_modified(&path, mtime);
        path
    }

    /// Writes a file directly into the staging tree at `relative`.
    pub fn write_staged(&self, relative: &str) -> PathBuf {
        let path = self.config.staging_root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create staging dir");
        }
        fs::write(&path, relative.as_bytes()).expect("Failed to write staged file");
        path
    }

    /// Relative paths of every regular file under the live root.
    pub fn live_files(&self) -> Vec<String> {
        files_under(&self.config.live_root)
    }

    /// Relative paths of every regular file under the staging root.
    pub fn staged_files(&self) -> Vec<String> {
        files_under(&self.config.staging_root)
    }

    /// Relative paths of every regular file under the replication target.
    pub fn remote_files(&self) -> Vec<String> {
        files_under(&self.remote_dir())
    }
}

impl Default for TestLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic contents for a segment, distinct per segment.
pub fn segment_bytes(name: &SegmentName) -> Vec<u8> {
    format!("segment {name}\n").repeat(16).into_bytes()
}

/// Sets the mtime of `path` to `age` before now.
pub fn set_age(path: &Path, age: Duration) {
    set_modified(path, SystemTime::now() - age);
}

/// Sets the mtime of `path`.
pub fn set_modified(path: &Path, mtime: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(mtime))
        .expect("Failed to set mtime");
}

/// Relative, `/`-separated paths of every regular file under `root`, sorted.
///
/// A missing root has no files.
pub fn files_under(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect(root, root, &mut files);
    files.sort();
    files
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
        } else if let Ok(relative) = path.strip_prefix(root) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
}
