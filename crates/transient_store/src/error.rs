//! Error types for store operations.

use crate::types::{EntityId, Version};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An entity written by the transaction was changed by another writer
    /// after the transaction's snapshot was taken.
    #[error("version conflict on entity {entity}: snapshot {expected:?}, current {actual:?}")]
    VersionConflict {
        /// The conflicting entity.
        entity: EntityId,
        /// Version observed in the transaction's snapshot.
        expected: Option<Version>,
        /// Latest committed version.
        actual: Option<Version>,
    },

    /// Entity does not exist in the transaction's view.
    #[error("entity not found: {entity}")]
    EntityNotFound {
        /// The missing entity.
        entity: EntityId,
    },

    /// Entity type name was never registered.
    #[error("unknown entity type: {name}")]
    UnknownType {
        /// Name of the type.
        name: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates an entity-not-found error.
    pub fn entity_not_found(entity: EntityId) -> Self {
        Self::EntityNotFound { entity }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error is an optimistic version conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
