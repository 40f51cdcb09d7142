//! # camrec Store
//!
//! On-disk representation of recording segments in each lifecycle state.
//!
//! This crate is the lowest layer of camrec. It knows how segment files
//! are named and where they live, and it provides the only primitives
//! that mutate them:
//!
//! - enumeration of stations and segments (live and staged)
//! - closure detection by mtime age
//! - crash-safe move (rename, or copy + verify + delete across volumes)
//! - delete with pruning of emptied directories
//!
//! ## Design Principles
//!
//! - Segments are never mutated after leaving the recording state, only
//!   relocated or removed
//! - Every primitive is idempotent: acting on a path that is already gone
//!   is success, not an error
//! - No knowledge of the ledger, locks, or scheduling
//!
//! ## Example
//!
//! ```no_run
//! use camrec_store::SegmentStore;
//! use std::time::{Duration, SystemTime};
//!
//! let store = SegmentStore::new("/srv/cameras", "/srv/ready_for_backup", "mkv");
//! for station in store.list_stations().unwrap() {
//!     let closed = store
//!         .list_closed_segments(&station, SystemTime::now(), Duration::from_secs(1200))
//!         .unwrap();
//!     for segment in &closed {
//!         store.stage(segment).unwrap();
//!     }
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ops;
mod segment;
mod store;

pub use error::{StoreError, StoreResult};
pub use ops::{
    delete_segment, file_digest, move_segment, partial_path, prune_empty_dirs, MoveOutcome,
};
pub use segment::{
    validate_station_id, LifecycleState, Segment, SegmentName, DEFAULT_EXTENSION, PARTIAL_SUFFIX,
    TIMESTAMP_FORMAT,
};
pub use store::{walk_segments, SegmentStore, StagedFile};
