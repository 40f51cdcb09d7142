//! Crash-safe file primitives.
//!
//! Every primitive re-checks the current on-disk state before acting, so
//! running one twice, or after a crash part-way through, converges on the
//! same result:
//!
//! - a move whose source is gone is already satisfied
//! - a move that finds both source and a verified destination finishes by
//!   removing the source
//! - a delete whose target is gone is already satisfied
//!
//! Cross-volume moves copy into `<dest>.partial`, fsync, verify the SHA-256
//! digest against the source, rename into place, and only then remove the
//! source. A crash at any point leaves the source intact.

use crate::error::{StoreError, StoreResult};
use crate::segment::PARTIAL_SUFFIX;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a move actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Renamed within one volume.
    Renamed,
    /// Copied, verified, and the source removed.
    Copied,
    /// A verified destination already existed; the leftover source was removed.
    Completed,
    /// The source no longer exists; an earlier run already moved it.
    AlreadySatisfied,
}

impl MoveOutcome {
    /// Returns true if this call changed anything on disk.
    pub fn did_work(self) -> bool {
        !matches!(self, MoveOutcome::AlreadySatisfied)
    }
}

/// Moves `src` to `dest`, creating destination directories on demand.
pub fn move_segment(src: &Path, dest: &Path) -> StoreResult<MoveOutcome> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MoveOutcome::AlreadySatisfied),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() {
        return Err(StoreError::NotAFile {
            path: src.to_path_buf(),
        });
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    // Leftover from an interrupted copy: both sides exist.
    if dest.exists() && same_content(src, dest)? {
        remove_if_present(src)?;
        remove_if_present(&partial_path(dest))?;
        sync_parent(src)?;
        debug!(src = %src.display(), "completed interrupted move");
        return Ok(MoveOutcome::Completed);
    }

    match fs::rename(src, dest) {
        Ok(()) => {
            // An earlier cross-volume attempt may have left its copy behind.
            remove_if_present(&partial_path(dest))?;
            sync_parent(dest)?;
            Ok(MoveOutcome::Renamed)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && !src.exists() => {
            Ok(MoveOutcome::AlreadySatisfied)
        }
        Err(e) => {
            debug!(src = %src.display(), error = %e, "rename failed, falling back to copy");
            copy_verify_delete(src, dest)
        }
    }
}

fn copy_verify_delete(src: &Path, dest: &Path) -> StoreResult<MoveOutcome> {
    let tmp = partial_path(dest);

    match fs::copy(src, &tmp) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound && !src.exists() => {
            remove_if_present(&tmp)?;
            return Ok(MoveOutcome::AlreadySatisfied);
        }
        Err(e) => return Err(e.into()),
    }
    File::open(&tmp)?.sync_all()?;

    if file_digest(src)? != file_digest(&tmp)? {
        remove_if_present(&tmp)?;
        return Err(StoreError::VerifyFailed {
            path: src.to_path_buf(),
        });
    }

    fs::rename(&tmp, dest)?;
    sync_parent(dest)?;
    remove_if_present(src)?;
    sync_parent(src)?;
    Ok(MoveOutcome::Copied)
}

/// Path of the in-progress copy for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    dest.with_file_name(name)
}

/// Deletes `path` and prunes now-empty parents up to, but excluding, `root`.
///
/// Returns `false` if the file was already gone.
pub fn delete_segment(path: &Path, root: &Path) -> StoreResult<bool> {
    let removed = remove_if_present(path)?;
    prune_parents(path.parent(), root);
    Ok(removed)
}

fn prune_parents(mut dir: Option<&Path>, root: &Path) {
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        match fs::remove_dir(current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // Not empty (or not ours to remove); stop climbing.
            Err(_) => break,
        }
        dir = current.parent();
    }
}

/// Removes every empty directory below `root`, deepest first.
///
/// `root` itself is never removed. Returns the number of directories removed.
pub fn prune_empty_dirs(root: &Path) -> StoreResult<usize> {
    let mut removed = 0;
    match prune_below(root, &mut removed) {
        Ok(_) => Ok(removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(removed),
        Err(e) => Err(e.into()),
    }
}

fn prune_below(dir: &Path, removed: &mut usize) -> io::Result<bool> {
    let mut empty = true;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            empty = false;
            continue;
        }
        let path = entry.path();
        if !prune_below(&path, removed)? {
            empty = false;
            continue;
        }
        match fs::remove_dir(&path) {
            Ok(()) => *removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not prune directory");
                empty = false;
            }
        }
    }
    Ok(empty)
}

/// SHA-256 digest of a file's contents.
pub fn file_digest(path: &Path) -> StoreResult<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

fn same_content(a: &Path, b: &Path) -> StoreResult<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(file_digest(a)? == file_digest(b)?)
}

fn remove_if_present(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Fsyncs the directory containing `path` so a rename or unlink is durable.
#[cfg(unix)]
fn sync_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if parent.exists() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StoreResult<()> {
    // NTFS journals metadata; directory handles cannot be fsynced
    Ok(())
}
