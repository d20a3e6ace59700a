//! Change tracking.
//!
//! A session buffers every mutation in a [`ChangeTracker`] until flush:
//! - scalar properties and blobs with their snapshot ("old") values
//! - per-link deltas (added targets, removed targets, cleared flag)
//! - created and removed entities
//!
//! Changes are reported to listeners and constraints as
//! [`EntityChangeDescription`]s.

mod description;
mod tracker;

pub use description::{ChangeType, EntityChangeDescription, LinkChange};
pub use tracker::ChangeTracker;
pub(crate) use tracker::PropertyChange;
