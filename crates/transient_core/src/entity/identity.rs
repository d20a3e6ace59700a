//! Entity identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use transient_store::EntityId;

/// Session-layer temporary ID of an entity that has not been written yet.
///
/// Temporary IDs are unique within a [`crate::SessionRegistry`] and are
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(pub u64);

impl TempId {
    /// Creates a temporary ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

/// Identity of an entity as seen by a session.
///
/// A New entity is `Temporary` until its first successful flush, at which
/// point it becomes `Persistent` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Store-assigned identity.
    Persistent(EntityId),
    /// Identity of a not-yet-written entity.
    Temporary(TempId),
}

impl Identity {
    /// Returns the store ID, if persisted.
    #[must_use]
    pub fn persistent(&self) -> Option<EntityId> {
        match self {
            Identity::Persistent(id) => Some(*id),
            Identity::Temporary(_) => None,
        }
    }

    /// Returns the temporary ID, if not yet persisted.
    #[must_use]
    pub fn temporary(&self) -> Option<TempId> {
        match self {
            Identity::Persistent(_) => None,
            Identity::Temporary(id) => Some(*id),
        }
    }

    /// Returns true for temporary identities.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Identity::Temporary(_))
    }
}

impl From<EntityId> for Identity {
    fn from(id: EntityId) -> Self {
        Identity::Persistent(id)
    }
}

impl From<TempId> for Identity {
    fn from(id: TempId) -> Self {
        Identity::Temporary(id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Persistent(id) => write!(f, "{id}"),
            Identity::Temporary(id) => write!(f, "{id}"),
        }
    }
}
