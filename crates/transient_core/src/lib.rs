//! # Transient Core
//!
//! Transactional session layer over a versioned entity store.
//!
//! This crate provides:
//! - Entity proxies whose mutations are buffered in a session
//! - Per-entity change descriptions with detailed link deltas
//! - A session state machine (open, suspend, resume, flush, commit, abort)
//! - Constraint validation before anything becomes durable
//! - Session and entity listeners at well-defined pipeline phases
//! - Optimistic conflict detection with bounded replay
//!
//! ## Example
//!
//! ```rust
//! use transient_core::{Cardinality, EntityTypeSchema, Schema, SessionRegistry};
//! use transient_store::InMemoryStore;
//!
//! let schema = Schema::new()
//!     .with_type(EntityTypeSchema::new("User").required("login").unique(["login"]))
//!     .with_type(EntityTypeSchema::new("Issue").link("reporter", Cardinality::One));
//! let registry = SessionRegistry::builder(InMemoryStore::new())
//!     .schema(schema)
//!     .build();
//!
//! let mut session = registry.begin().unwrap();
//! let user = session.new_entity("User").unwrap();
//! user.set_property(&mut session, "login", "vadim".into()).unwrap();
//! let issue = session.new_entity("Issue").unwrap();
//! issue.add_link(&mut session, "reporter", &user).unwrap();
//! session.commit().unwrap();
//!
//! assert!(issue.id().is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change;
mod config;
pub mod conflict;
pub mod constraint;
pub mod entity;
mod error;
pub mod listener;
pub mod session;
mod stats;
mod types;
mod view;

pub use change::{ChangeTracker, ChangeType, EntityChangeDescription, LinkChange};
pub use config::Config;
pub use conflict::{ConflictDetector, ConflictReport};
pub use constraint::{
    Cardinality, Constraint, ConstraintViolation, EntityTypeSchema, Schema, ViolationKind,
    ViolationSet,
};
pub use entity::{Entity, EntityState, Identity, TempId};
pub use error::{CoreError, CoreResult};
pub use listener::{
    EntityEvent, EntityListener, EntityPhase, ListenerId, SessionEvent, SessionListener,
    SessionPhase,
};
pub use session::{RegistryBuilder, Session, SessionRegistry};
pub use stats::{SessionStats, StatsSnapshot};
pub use types::{SessionId, SessionState};
pub use view::SessionView;
