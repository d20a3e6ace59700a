//! Error types for Transient core.

use crate::constraint::ViolationSet;
use crate::entity::Identity;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store collaborator error.
    #[error("store error: {0}")]
    Storage(#[from] transient_store::StoreError),

    /// One or more constraints failed during flush.
    ///
    /// Every violation found is listed; validation never stops at the first.
    #[error("constraint validation failed:\n{0}")]
    Constraints(ViolationSet),

    /// Version conflict that survived every retry.
    #[error("conflict on entity {entity} after {attempts} attempt(s)")]
    Conflict {
        /// An entity whose version changed under the session.
        entity: Identity,
        /// Number of durability attempts made.
        attempts: usize,
    },

    /// A touched entity was deleted by another writer.
    #[error("entity {entity} was removed from the store")]
    EntityRemovedInStore {
        /// The vanished entity.
        entity: Identity,
    },

    /// Operation not permitted in the current state.
    ///
    /// This is a programming error: mutating a removed entity, resuming an
    /// unknown or attached session, or using a finished session.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A listener rejected the flush.
    #[error("listener failed: {message}")]
    Listener {
        /// Message supplied by the listener.
        message: String,
    },
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates a listener error.
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::IllegalState`].
    #[must_use]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState { .. })
    }

    /// Returns true for [`CoreError::Conflict`].
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns the violations of a [`CoreError::Constraints`] error.
    #[must_use]
    pub fn violations(&self) -> Option<&ViolationSet> {
        match self {
            Self::Constraints(set) => Some(set),
            _ => None,
        }
    }
}
