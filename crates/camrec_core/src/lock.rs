//! Per-operation exclusivity locks.
//!
//! ```text
//! <lock_dir>/
//! ├─ replicate.lock    # {"token":"…","pid":4242,"host":"nas-pi","acquired_at":"…"}
//! ├─ reclaim.lock
//! └─ watchdog.lock
//! ```
//!
//! Exclusion comes from an OS advisory lock on the file, which the kernel
//! drops when the holder process dies. A held lock therefore always means
//! a live holder, and a killed process can never wedge the pipeline.
//!
//! The file body names the current holder. It is cleared on release, so a
//! body found on acquisition belongs to a holder that died mid-operation;
//! that lock is reported as reclaimed.
//!
//! Lock files are never deleted: unlinking a lock file another process has
//! open would let two holders lock two different inodes.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lock name for replication runs.
pub const REPLICATE_LOCK: &str = "replicate";
/// Lock name for reclaim runs.
pub const RECLAIM_LOCK: &str = "reclaim";
/// Lock name for watchdog evaluations.
pub const WATCHDOG_LOCK: &str = "watchdog";

/// Identity of a lock holder, stored in the lock file body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Unique token of this acquisition.
    pub token: Uuid,
    /// Holder process id.
    pub pid: u32,
    /// Holder host name.
    pub host: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            token: Uuid::new_v4(),
            pid: std::process::id(),
            host: crate::host_name(),
            acquired_at: Utc::now(),
        }
    }

    /// Short human description, e.g. `pid 4242 on nas-pi since 2025-05-28T12:00:00Z`.
    pub fn describe(&self) -> String {
        format!(
            "pid {} on {} since {}",
            self.pid,
            self.host,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// How a lock was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquired {
    /// The lock was free and clean.
    Fresh,
    /// The previous holder died without releasing; its record, if readable.
    Reclaimed(Option<LockHolder>),
}

/// Directory of per-operation lock files.
#[derive(Debug, Clone)]
pub struct LockDir {
    dir: PathBuf,
}

impl LockDir {
    /// Creates a lock directory handle; the directory is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the lock file for `operation`.
    #[must_use]
    pub fn path(&self, operation: &str) -> PathBuf {
        self.dir.join(format!("{operation}.lock"))
    }

    /// Takes the lock for `operation` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockHeld`] if a live process holds it; the lock
    /// file is left untouched in that case.
    pub fn try_acquire(&self, operation: &str) -> CoreResult<LockGuard> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(operation);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() != fs2::lock_contended_error().kind() {
                return Err(e.into());
            }
            let holder = read_holder(&mut file).ok().flatten();
            return Err(CoreError::LockHeld {
                operation: operation.to_string(),
                holder: holder.map(|h| h.describe()),
            });
        }

        let acquired = match read_body(&mut file) {
            Ok(body) if body.trim().is_empty() => LockAcquired::Fresh,
            Ok(body) => {
                let previous = serde_json::from_str::<LockHolder>(&body).ok();
                warn!(
                    operation,
                    previous = previous.as_ref().map(LockHolder::describe).as_deref().unwrap_or("unreadable"),
                    class = %crate::ErrorClass::StaleLock,
                    "reclaiming lock from dead holder"
                );
                LockAcquired::Reclaimed(previous)
            }
            Err(e) => {
                unlock_after_error(&file, operation);
                return Err(e.into());
            }
        };

        let holder = LockHolder::current();
        if let Err(e) = write_body(&mut file, &holder) {
            unlock_after_error(&file, operation);
            return Err(e);
        }
        debug!(operation, token = %holder.token, "lock acquired");

        Ok(LockGuard {
            operation: operation.to_string(),
            file,
            holder,
            acquired,
            released: false,
        })
    }

    /// Reads the recorded holder of `operation`, if any.
    ///
    /// A record on an unlocked file is a stale holder that has not been
    /// reclaimed yet.
    pub fn holder(&self, operation: &str) -> CoreResult<Option<LockHolder>> {
        let mut file = match File::open(self.path(operation)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        read_holder(&mut file)
    }
}

/// Proof of holding an operation lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    operation: String,
    file: File,
    holder: LockHolder,
    acquired: LockAcquired,
    released: bool,
}

impl LockGuard {
    /// The locked operation.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// This acquisition's holder record.
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// How the lock was obtained.
    pub fn acquired(&self) -> &LockAcquired {
        &self.acquired
    }

    /// Returns true if a dead holder's lock was reclaimed.
    pub fn was_reclaimed(&self) -> bool {
        matches!(self.acquired, LockAcquired::Reclaimed(_))
    }

    /// Clears the holder record and unlocks, reporting any error.
    pub fn release(mut self) -> CoreResult<()> {
        self.released = true;
        self.clear_and_unlock()
    }

    fn clear_and_unlock(&mut self) -> CoreResult<()> {
        let cleared = self
            .file
            .set_len(0)
            .and_then(|()| self.file.sync_data());
        // Unlock even if clearing failed; the next holder then sees a stale record.
        FileExt::unlock(&self.file)?;
        cleared?;
        debug!(operation = %self.operation, "lock released");
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.clear_and_unlock() {
                warn!(operation = %self.operation, error = %e, "lock release failed");
            }
        }
    }
}

/// Unlocks a file whose acquisition failed part-way; the original error wins.
fn unlock_after_error(file: &File, operation: &str) {
    if let Err(e) = FileExt::unlock(file) {
        debug!(operation, error = %e, "unlock after failed acquisition failed");
    }
}

fn read_body(file: &mut File) -> io::Result<String> {
    let mut body = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut body)?;
    Ok(body)
}

fn read_holder(file: &mut File) -> CoreResult<Option<LockHolder>> {
    let body = read_body(file)?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str(&body).ok())
}

fn write_body(file: &mut File, holder: &LockHolder) -> CoreResult<()> {
    let body = serde_json::to_string(holder)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(body.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Convenience: the lock directory root.
impl AsRef<Path> for LockDir {
    fn as_ref(&self) -> &Path {
        &self.dir
    }
}
