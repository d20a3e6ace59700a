//! Ordered listener registrations.

use crate::listener::{EntityListener, SessionListener};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned when registering a listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

#[derive(Clone)]
pub(crate) enum Listener {
    Session(Arc<dyn SessionListener>),
    Entity {
        type_filter: Option<String>,
        listener: Arc<dyn EntityListener>,
    },
}

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: ListenerId,
    pub(crate) listener: Listener,
}

impl Registration {
    /// Returns true if this entity listener wants events of `type_name`.
    pub(crate) fn accepts(&self, type_name: &str) -> bool {
        match &self.listener {
            Listener::Entity { type_filter, .. } => {
                type_filter.as_deref().map_or(true, |t| t == type_name)
            }
            Listener::Session(_) => false,
        }
    }
}

/// Session and entity listeners in registration order.
///
/// Dispatch walks one list, so session and entity listeners interleave
/// exactly as they were registered.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push(Registration { id, listener });
        id
    }

    /// Registers a session listener.
    pub fn add_session_listener(&self, listener: impl SessionListener + 'static) -> ListenerId {
        self.push(Listener::Session(Arc::new(listener)))
    }

    /// Registers an entity listener for every type.
    pub fn add_entity_listener(&self, listener: impl EntityListener + 'static) -> ListenerId {
        self.push(Listener::Entity {
            type_filter: None,
            listener: Arc::new(listener),
        })
    }

    /// Registers an entity listener for one type.
    pub fn add_entity_listener_for(
        &self,
        type_name: impl Into<String>,
        listener: impl EntityListener + 'static,
    ) -> ListenerId {
        self.push(Listener::Entity {
            type_filter: Some(type_name.into()),
            listener: Arc::new(listener),
        })
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|r| r.id != id);
        entries.len() != before
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copies the current list so listeners can run without the lock held.
    pub(crate) fn snapshot(&self) -> Vec<Registration> {
        self.entries.read().clone()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
