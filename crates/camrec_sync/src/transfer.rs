//! Transfer collaborator abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Files a transfer invocation confirmed, and those it could not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Relative paths confirmed present on the target.
    pub transferred: Vec<String>,
    /// Relative paths that were requested but not confirmed.
    pub failed: Vec<String>,
}

impl TransferOutcome {
    /// Every requested file confirmed.
    pub fn complete(files: &[String]) -> Self {
        Self {
            transferred: files.to_vec(),
            failed: Vec::new(),
        }
    }

    /// Returns true if some requested files were not confirmed.
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Copies a batch of files from a local tree to a remote target.
///
/// One call covers the whole batch. `Ok` means the mechanism ran to
/// completion, possibly with per-file failures; `Err` means nothing can be
/// considered transferred.
pub trait Transfer: Send + Sync {
    /// Transfers `files` (relative to `source_root`) to `target`.
    fn transfer(&self, source_root: &Path, files: &[String], target: &str)
        -> SyncResult<TransferOutcome>;
}

impl<T: Transfer + ?Sized> Transfer for Arc<T> {
    fn transfer(
        &self,
        source_root: &Path,
        files: &[String],
        target: &str,
    ) -> SyncResult<TransferOutcome> {
        (**self).transfer(source_root, files, target)
    }
}

impl<T: Transfer + ?Sized> Transfer for Box<T> {
    fn transfer(
        &self,
        source_root: &Path,
        files: &[String],
        target: &str,
    ) -> SyncResult<TransferOutcome> {
        (**self).transfer(source_root, files, target)
    }
}

/// Scripted result of one [`MockTransfer`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Confirm every file.
    Succeed,
    /// Fail the whole invocation.
    Fail {
        /// Whether the failure is retryable.
        retryable: bool,
    },
    /// Confirm every file except these relative paths.
    Partial(HashSet<String>),
}

/// One recorded [`MockTransfer`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    /// Source root passed in.
    pub source_root: PathBuf,
    /// Files requested.
    pub files: Vec<String>,
    /// Target passed in.
    pub target: String,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A mock transfer for testing.
///
/// Behaviors queued with [`MockTransfer::push_behavior`] are used first,
/// one per call; after that the default behavior applies.
#[derive(Default)]
pub struct MockTransfer {
    queued: Mutex<VecDeque<MockBehavior>>,
    default: Mutex<Option<MockBehavior>>,
    calls: Mutex<Vec<TransferCall>>,
    copy_to_target: bool,
    hook: Mutex<Option<Hook>>,
}

impl MockTransfer {
    /// Creates a mock that confirms everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock that also copies confirmed files into `target`,
    /// treated as a local directory.
    pub fn copying() -> Self {
        Self {
            copy_to_target: true,
            ..Self::default()
        }
    }

    /// Sets the behavior used when no queued behavior remains.
    pub fn set_default(&self, behavior: MockBehavior) {
        *self.default.lock() = Some(behavior);
    }

    /// Queues the behavior for the next call.
    pub fn push_behavior(&self, behavior: MockBehavior) {
        self.queued.lock().push_back(behavior);
    }

    /// Runs `hook` inside every call, before the outcome is decided.
    pub fn set_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_behavior(&self) -> MockBehavior {
        if let Some(behavior) = self.queued.lock().pop_front() {
            return behavior;
        }
        self.default.lock().clone().unwrap_or(MockBehavior::Succeed)
    }
}

impl Transfer for MockTransfer {
    fn transfer(
        &self,
        source_root: &Path,
        files: &[String],
        target: &str,
    ) -> SyncResult<TransferOutcome> {
        self.calls.lock().push(TransferCall {
            source_root: source_root.to_path_buf(),
            files: files.to_vec(),
            target: target.to_string(),
        });
        if let Some(hook) = self.hook.lock().as_ref() {
            hook();
        }

        let outcome = match self.next_behavior() {
            MockBehavior::Succeed => TransferOutcome::complete(files),
            MockBehavior::Fail { retryable } => {
                return Err(SyncError::Transfer {
                    message: "simulated transfer failure".into(),
                    retryable,
                })
            }
            MockBehavior::Partial(failing) => {
                let (failed, transferred): (Vec<String>, Vec<String>) =
                    files.iter().cloned().partition(|f| failing.contains(f));
                TransferOutcome {
                    transferred,
                    failed,
                }
            }
        };

        if self.copy_to_target {
            for file in &outcome.transferred {
                let dest = Path::new(target).join(file);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| SyncError::transfer_fatal(e.to_string()))?;
                }
                fs::copy(source_root.join(file), &dest)
                    .map_err(|e| SyncError::transfer_fatal(e.to_string()))?;
            }
        }
        Ok(outcome)
    }
}
