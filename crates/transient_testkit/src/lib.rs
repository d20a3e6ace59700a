//! # Transient Testkit
//!
//! Test utilities for Transient.
//!
//! This crate provides:
//! - Registry fixtures with a small issue-tracker schema
//! - Event recorders for session and entity listeners
//! - Property-based mutation generators using proptest
//! - JSON snapshots of change descriptions
//! - Suspend/resume stress runs
//!
//! ## Usage
//!
//! ```rust
//! use transient_testkit::prelude::*;
//!
//! with_test_registry(|registry| {
//!     let user = registry.create_user("vadim");
//!     assert_eq!(registry.read_text(user, "login").as_deref(), Some("vadim"));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod snapshot;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::snapshot::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use snapshot::*;
pub use stress::*;
