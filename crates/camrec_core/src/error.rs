//! Error types for camrec core.

use camrec_store::StoreError;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// How a failure should be handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Disk or network hiccup; the next scheduled run retries.
    TransientIo,
    /// A dead holder's lock was found and reclaimed.
    StaleLock,
    /// A live holder owns the lock; this run aborts cleanly.
    ConcurrencyConflict,
    /// A producer stopped producing fresh segments.
    ProducerStall,
    /// Missing path or invalid setting; fatal for the affected component.
    PermanentConfig,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::TransientIo => "transient-io",
            ErrorClass::StaleLock => "stale-lock",
            ErrorClass::ConcurrencyConflict => "concurrency-conflict",
            ErrorClass::ProducerStall => "producer-stall",
            ErrorClass::PermanentConfig => "permanent-config",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in camrec core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Segment store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration is missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// Another live process holds the operation lock.
    #[error("lock for {operation} is held{}", holder.as_deref().map(|h| format!(" by {h}")).unwrap_or_default())]
    LockHeld {
        /// The locked operation.
        operation: String,
        /// Description of the current holder, if readable.
        holder: Option<String>,
    },

    /// The supervision collaborator failed.
    #[error("supervisor failed for {unit}: {message}")]
    Supervisor {
        /// Unit the action targeted.
        unit: String,
        /// Failure description.
        message: String,
    },

    /// The notification collaborator failed.
    #[error("notification failed: {message}")]
    Notify {
        /// Failure description.
        message: String,
    },

    /// An external command did not finish in time and was killed.
    #[error("{program} timed out after {}s", after.as_secs())]
    Timeout {
        /// The program that was run.
        program: String,
        /// The limit that was exceeded.
        after: Duration,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a supervisor error.
    pub fn supervisor(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Supervisor {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Creates a notification error.
    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify {
            message: message.into(),
        }
    }

    /// Maps this error onto the pipeline's failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Store(e) if e.is_transient() => ErrorClass::TransientIo,
            CoreError::Store(_) => ErrorClass::PermanentConfig,
            CoreError::Config { .. } => ErrorClass::PermanentConfig,
            CoreError::LockHeld { .. } => ErrorClass::ConcurrencyConflict,
            CoreError::Io(_)
            | CoreError::Supervisor { .. }
            | CoreError::Notify { .. }
            | CoreError::Timeout { .. } => ErrorClass::TransientIo,
        }
    }

    /// Returns true for a clean lock conflict, which is not a failure.
    pub fn is_lock_held(&self) -> bool {
        matches!(self, CoreError::LockHeld { .. })
    }
}

/// A per-station or per-file failure collected during a run.
///
/// Runs keep going past these; one station's trouble never blocks another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// The station or path the failure concerns.
    pub subject: String,
    /// Taxonomy class of the underlying error.
    pub class: ErrorClass,
    /// Rendered error message.
    pub message: String,
}

impl Failure {
    /// Records `error` against `subject`.
    pub fn new(subject: impl Into<String>, error: &CoreError) -> Self {
        Self {
            subject: subject.into(),
            class: error.class(),
            message: error.to_string(),
        }
    }
}
