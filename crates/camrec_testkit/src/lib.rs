//! # camrec Testkit
//!
//! Test utilities for camrec.
//!
//! This crate provides:
//! - A temporary pipeline layout with segment writers
//! - Crash simulation for interrupted staging moves and killed replicators
//! - Property-based test generators
//!
//! ## Usage
//!
//! ```rust,ignore
//! use camrec_testkit::prelude::*;
//!
//! let layout = TestLayout::new();
//! layout.write_segment_aged("ROST1", std::time::Duration::from_secs(1300));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
