//! Error types for replication.

use camrec_core::{CoreError, ErrorClass};
use camrec_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for replication operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Ledger, lock, or configuration error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Staging tree error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The transfer mechanism failed; nothing was confirmed.
    #[error("transfer failed: {message}")]
    Transfer {
        /// Error message.
        message: String,
        /// Whether the transfer may succeed if re-invoked.
        retryable: bool,
    },

    /// The transfer did not finish in time and was killed.
    #[error("transfer timed out after {}s", after.as_secs())]
    Timeout {
        /// The limit that was exceeded.
        after: Duration,
    },
}

impl SyncError {
    /// Creates a retryable transfer error.
    pub fn transfer_retryable(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transfer error.
    pub fn transfer_fatal(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if re-invoking the transfer within this run may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transfer { retryable, .. } => *retryable,
            SyncError::Timeout { .. } => true,
            SyncError::Core(_) | SyncError::Store(_) => false,
        }
    }

    /// Maps this error onto the pipeline's failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Core(e) => e.class(),
            SyncError::Store(e) if e.is_transient() => ErrorClass::TransientIo,
            SyncError::Store(_) => ErrorClass::PermanentConfig,
            SyncError::Transfer { .. } | SyncError::Timeout { .. } => ErrorClass::TransientIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transfer_retryable("connection reset").is_retryable());
        assert!(!SyncError::transfer_fatal("syntax error").is_retryable());
        assert!(SyncError::Timeout {
            after: Duration::from_secs(3600)
        }
        .is_retryable());
        assert!(!SyncError::Core(CoreError::config("bad")).is_retryable());
    }

    #[test]
    fn classes() {
        assert_eq!(
            SyncError::transfer_retryable("x").class(),
            ErrorClass::TransientIo
        );
        let held = SyncError::Core(CoreError::LockHeld {
            operation: "replicate".into(),
            holder: None,
        });
        assert_eq!(held.class(), ErrorClass::ConcurrencyConflict);
    }

    #[test]
    fn error_display() {
        let err = SyncError::Timeout {
            after: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "transfer timed out after 90s");
    }
}
