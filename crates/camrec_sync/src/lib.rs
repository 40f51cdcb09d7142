//! # camrec Sync
//!
//! Replication of staged segments to an off-node target.
//!
//! This crate provides:
//! - The replicator run (lock → scan → transfer → record)
//! - The transfer collaborator trait, with an rsync implementation and a
//!   scriptable mock
//! - Retry with exponential backoff for transient transfer failures
//!
//! ## Key Invariants
//!
//! - At most one replication run is active at a time (per lock directory)
//! - Only files the transfer confirmed are recorded in the ledger
//! - A failed run records nothing, so nothing becomes eligible for deletion
//! - Re-running over a fully replicated tree transfers nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod replicator;
mod rsync;
mod transfer;

pub use config::RetryConfig;
pub use error::{SyncError, SyncResult};
pub use replicator::{ReplicationReport, Replicator, ReplicatorState, ReplicatorStats};
pub use rsync::{classify_exit, RsyncTransfer};
pub use transfer::{MockBehavior, MockTransfer, Transfer, TransferCall, TransferOutcome};
