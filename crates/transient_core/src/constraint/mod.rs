//! Constraint validation.
//!
//! Constraints are declared per entity type in a [`Schema`]:
//! - required properties
//! - link cardinality
//! - unique indexes over one or more properties
//! - custom [`Constraint`] implementations
//!
//! Validation runs during flush over every created or modified entity and
//! collects all violations into a [`ViolationSet`].

mod schema;
mod violation;

pub use schema::{Cardinality, Constraint, EntityTypeSchema, Schema};
pub use violation::{ConstraintViolation, ViolationKind, ViolationSet};
