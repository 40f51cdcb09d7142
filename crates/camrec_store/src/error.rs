//! Error types for segment store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for segment store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during segment store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A configured root directory does not exist.
    #[error("root directory does not exist: {}", path.display())]
    MissingRoot {
        /// The missing root.
        path: PathBuf,
    },

    /// A copied segment did not match its source after the copy.
    #[error("copy verification failed for {}", path.display())]
    VerifyFailed {
        /// The source path whose copy did not verify.
        path: PathBuf,
    },

    /// A path expected to be a regular file is something else.
    #[error("not a regular file: {}", path.display())]
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// A station identifier cannot be used as a directory name.
    #[error("invalid station identifier: {0:?}")]
    InvalidStation(String),
}

impl StoreError {
    /// Returns true if retrying on the next scheduled run may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::VerifyFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let io = StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk hiccup"));
        assert!(io.is_transient());
        assert!(StoreError::VerifyFailed {
            path: PathBuf::from("a.mkv")
        }
        .is_transient());
        assert!(!StoreError::MissingRoot {
            path: PathBuf::from("/nope")
        }
        .is_transient());
        assert!(!StoreError::InvalidStation("a/b".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = StoreError::MissingRoot {
            path: PathBuf::from("/srv/cameras"),
        };
        assert_eq!(err.to_string(), "root directory does not exist: /srv/cameras");
    }
}
