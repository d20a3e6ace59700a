//! Core type definitions for sessions.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a session.
///
/// Session IDs are random UUIDs; they are the handle used to resume a
/// suspended session on another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Session accepts reads and mutations.
    Open,
    /// A flush or commit is in progress.
    Flushing,
    /// Session has been committed. Terminal.
    Committed,
    /// Session has been aborted. Terminal.
    Aborted,
}

impl SessionState {
    /// Returns true for `Committed` and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(!SessionState::Open.is_terminal());
        assert!(!SessionState::Flushing.is_terminal());
    }

    #[test]
    fn display() {
        let id = SessionId::from(Uuid::nil());
        assert_eq!(
            format!("{id}"),
            "session:00000000-0000-0000-0000-000000000000"
        );
    }
}
