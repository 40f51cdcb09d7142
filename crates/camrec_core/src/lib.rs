//! # camrec Core
//!
//! Segment lifecycle for unattended camera recorders.
//!
//! Producers write fixed-length segments into a per-station live tree.
//! This crate moves them through the rest of their life:
//!
//! - **Stager**: moves closed segments into a station/date staging tree
//! - **Sync ledger**: append-only, date-partitioned record of confirmed
//!   replications
//! - **Reclaimer**: deletes staged files only once the ledger lists them
//! - **Watchdog**: restarts producers that stop producing fresh segments
//! - **Locks**: per-operation exclusivity with dead-holder reclaim
//!
//! Replication itself lives in `camrec_sync`.
//!
//! ## Design Principles
//!
//! - All state is re-derived from disk on every run; a run can be killed at
//!   any point and the next one picks up where it stopped
//! - Failures are isolated per station and per file
//! - Nothing is deleted without a prior ledger entry
//! - Collaborators (supervision, notification) sit behind narrow traits
//!   with mock implementations for tests
//!
//! ## Example
//!
//! ```no_run
//! use camrec_core::{LogNotifier, PipelineConfig, Reclaimer, Stager, SystemctlSupervisor, Watchdog};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::load(Path::new("/etc/camrec.json")).unwrap();
//!
//! Stager::new(&config).run().unwrap();
//! Reclaimer::new(&config).unwrap().run().unwrap();
//!
//! let supervisor = SystemctlSupervisor::new(Duration::from_secs(30));
//! Watchdog::new(&config, supervisor, LogNotifier).evaluate().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod ledger;
mod lock;
mod notify;
pub mod process;
mod reclaimer;
mod stager;
mod supervisor;
mod watchdog;

pub use config::{
    default_unit_name, NotifyConfig, PipelineConfig, ReplicationConfig, SegmentConfig,
    StationConfig, WatchdogConfig,
};
pub use error::{CoreError, CoreResult, ErrorClass, Failure};
pub use ledger::{SyncLedger, PARTITION_EXTENSION};
pub use lock::{
    LockAcquired, LockDir, LockGuard, LockHolder, RECLAIM_LOCK, REPLICATE_LOCK, WATCHDOG_LOCK,
};
pub use notify::{CommandNotifier, LogNotifier, MockNotifier, Notifier, SentMessage, SUBJECT_PLACEHOLDER};
pub use reclaimer::{ReclaimReport, Reclaimer};
pub use stager::{StageReport, Stager};
pub use supervisor::{MockSupervisor, Supervisor, SystemctlSupervisor};
pub use watchdog::{
    StateFile, StationHealth, StationReport, Watchdog, WatchdogAction, WatchdogReport,
    WatchdogState, STATE_FILE,
};

/// Name of this host, for lock records and notifications.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}
