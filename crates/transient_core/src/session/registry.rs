//! Session registry.

use super::Session;
use crate::change::ChangeTracker;
use crate::config::Config;
use crate::constraint::Schema;
use crate::entity::{Entity, TempId};
use crate::error::{CoreError, CoreResult};
use crate::listener::{
    AsyncDispatcher, EntityListener, ListenerId, ListenerRegistry, SessionListener,
};
use crate::stats::SessionStats;
use crate::types::{SessionId, SessionState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use transient_store::{EntityId, Store, StoreTransaction};

/// Core state of a session while no one holds it.
pub(crate) struct ParkedSession {
    pub(crate) state: SessionState,
    pub(crate) tracker: ChangeTracker,
    pub(crate) handles: HashMap<EntityId, Entity>,
    pub(crate) txn: Box<dyn StoreTransaction>,
}

enum Slot {
    /// Held by a caller.
    Attached,
    /// Waiting in the registry for `resume`.
    Parked(ParkedSession),
}

/// State shared by a registry and all of its sessions.
pub(crate) struct RegistryShared {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) config: Config,
    pub(crate) schema: Schema,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) stats: SessionStats,
    pub(crate) dispatcher: Option<AsyncDispatcher>,
    slots: Mutex<HashMap<SessionId, Slot>>,
    next_temp: AtomicU64,
}

impl RegistryShared {
    pub(crate) fn next_temp_id(&self) -> TempId {
        TempId::new(self.next_temp.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn park(&self, id: SessionId, parked: ParkedSession) {
        self.slots.lock().insert(id, Slot::Parked(parked));
    }

    /// Forgets a finished session.
    pub(crate) fn release(&self, id: SessionId) {
        self.slots.lock().remove(&id);
    }
}

/// Entry point of the transient layer.
///
/// The registry begins sessions on a [`Store`], keeps suspended sessions
/// until they are resumed, and owns the constraint schema, the listeners
/// and the async dispatcher shared by all of its sessions. It is a cheap
/// cloneable handle.
///
/// # Example
///
/// ```rust
/// use transient_core::SessionRegistry;
/// use transient_store::InMemoryStore;
///
/// let registry = SessionRegistry::new(InMemoryStore::new());
///
/// let mut session = registry.begin().unwrap();
/// let user = session.new_entity("User").unwrap();
/// user.set_property(&mut session, "login", "vadim".into()).unwrap();
/// let id = session.suspend().unwrap();
///
/// let mut session = registry.resume(id).unwrap();
/// session.commit().unwrap();
/// assert!(user.id().is_some());
/// ```
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl SessionRegistry {
    /// Creates a registry with the default configuration and no constraints.
    pub fn new(store: impl Store + 'static) -> Self {
        Self::builder(store).build()
    }

    /// Creates a registry with a custom configuration.
    pub fn with_config(store: impl Store + 'static, config: Config) -> Self {
        Self::builder(store).config(config).build()
    }

    /// Starts building a registry.
    pub fn builder(store: impl Store + 'static) -> RegistryBuilder {
        RegistryBuilder {
            store: Arc::new(store),
            config: Config::default(),
            schema: Schema::default(),
        }
    }

    /// Begins a session on the latest committed snapshot.
    pub fn begin(&self) -> CoreResult<Session> {
        let txn = self.shared.store.begin_transaction()?;
        let id = SessionId::new();
        self.shared.slots.lock().insert(id, Slot::Attached);
        self.shared.stats.record_begin();
        tracing::debug!(session = %id, snapshot = %txn.snapshot_version(), "session begun");
        Ok(Session::attach(
            id,
            ParkedSession {
                state: SessionState::Open,
                tracker: ChangeTracker::new(),
                handles: HashMap::new(),
                txn,
            },
            Arc::clone(&self.shared),
        ))
    }

    /// Parks a session; same as [`Session::suspend`].
    pub fn suspend(&self, session: Session) -> CoreResult<SessionId> {
        if !Arc::ptr_eq(&session.shared, &self.shared) {
            return Err(CoreError::illegal_state(format!(
                "{} belongs to another registry",
                session.id()
            )));
        }
        session.suspend()
    }

    /// Takes a parked session back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if the ID is unknown, belongs to a
    /// finished session, or is currently held by someone else.
    pub fn resume(&self, id: SessionId) -> CoreResult<Session> {
        let parked = {
            let mut slots = self.shared.slots.lock();
            match slots.get_mut(&id) {
                None => {
                    return Err(CoreError::illegal_state(format!(
                        "{id} is unknown or finished"
                    )))
                }
                Some(Slot::Attached) => {
                    return Err(CoreError::illegal_state(format!(
                        "{id} is attached elsewhere"
                    )))
                }
                Some(slot) => match std::mem::replace(slot, Slot::Attached) {
                    Slot::Parked(parked) => parked,
                    Slot::Attached => {
                        return Err(CoreError::illegal_state(format!(
                            "{id} is attached elsewhere"
                        )))
                    }
                },
            }
        };
        tracing::debug!(session = %id, "session resumed");
        Ok(Session::attach(id, parked, Arc::clone(&self.shared)))
    }

    /// Runs `f` in a new session and commits it.
    ///
    /// If `f` fails the session is aborted and the error returned.
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Session) -> CoreResult<T>,
    {
        let mut session = self.begin()?;
        match f(&mut session) {
            Ok(value) => {
                session.commit()?;
                Ok(value)
            }
            Err(err) => Err(session.abort_with(err)),
        }
    }

    /// Registers a session listener.
    pub fn add_session_listener(&self, listener: impl SessionListener + 'static) -> ListenerId {
        self.shared.listeners.add_session_listener(listener)
    }

    /// Registers an entity listener for every type.
    pub fn add_entity_listener(&self, listener: impl EntityListener + 'static) -> ListenerId {
        self.shared.listeners.add_entity_listener(listener)
    }

    /// Registers an entity listener for one type.
    pub fn add_entity_listener_for(
        &self,
        type_name: impl Into<String>,
        listener: impl EntityListener + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .add_entity_listener_for(type_name, listener)
    }

    /// Removes a listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Blocks until every async event queued so far was delivered.
    pub fn wait_async_idle(&self) {
        if let Some(dispatcher) = &self.shared.dispatcher {
            dispatcher.wait_idle();
        }
    }

    /// Returns the number of queued async events.
    #[must_use]
    pub fn pending_async_events(&self) -> usize {
        self.shared
            .dispatcher
            .as_ref()
            .map_or(0, AsyncDispatcher::pending)
    }

    /// Returns the number of open sessions, attached or parked.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.shared.slots.lock().len()
    }

    /// Returns the number of parked sessions.
    #[must_use]
    pub fn parked_sessions(&self) -> usize {
        self.shared
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Parked(_)))
            .count()
    }

    /// Returns the session counters.
    #[must_use]
    pub fn stats(&self) -> &SessionStats {
        &self.shared.stats
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Returns the constraint schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.shared.schema
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.shared.store
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.shared.config)
            .field("listeners", &self.shared.listeners)
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

/// Builder for [`SessionRegistry`].
pub struct RegistryBuilder {
    store: Arc<dyn Store>,
    config: Config,
    schema: Schema,
}

impl RegistryBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the constraint schema.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Builds the registry, starting the async dispatcher if enabled.
    pub fn build(self) -> SessionRegistry {
        let dispatcher = if self.config.async_listeners {
            match AsyncDispatcher::start(self.config.async_queue_warn_threshold) {
                Ok(dispatcher) => Some(dispatcher),
                Err(err) => {
                    tracing::warn!(error = %err, "cannot start async dispatcher, delivering inline");
                    None
                }
            }
        } else {
            None
        };

        SessionRegistry {
            shared: Arc::new(RegistryShared {
                store: self.store,
                config: self.config,
                schema: self.schema,
                listeners: ListenerRegistry::new(),
                stats: SessionStats::new(),
                dispatcher,
                slots: Mutex::new(HashMap::new()),
                next_temp: AtomicU64::new(0),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transient_store::{InMemoryStore, Value};

    fn registry() -> SessionRegistry {
        SessionRegistry::with_config(InMemoryStore::new(), Config::new().async_listeners(false))
    }

    #[test]
    fn suspend_and_resume() {
        let registry = registry();
        let mut session = registry.begin().unwrap();
        let user = session.new_entity("User").unwrap();
        user.set_property(&mut session, "login", "a".into()).unwrap();

        let id = registry.suspend(session).unwrap();
        assert_eq!(registry.parked_sessions(), 1);

        let mut session = registry.resume(id).unwrap();
        assert_eq!(session.id(), id);
        assert_eq!(registry.parked_sessions(), 0);
        assert_eq!(
            user.get_property(&session, "login").unwrap(),
            Some(Value::from("a"))
        );
        session.commit().unwrap();
        assert_eq!(registry.open_sessions(), 0);
    }

    #[test]
    fn resume_failures() {
        let registry = registry();

        let unknown = SessionId::new();
        assert!(registry.resume(unknown).unwrap_err().is_illegal_state());

        let session = registry.begin().unwrap();
        let attached = session.id();
        assert!(registry.resume(attached).unwrap_err().is_illegal_state());

        let id = session.suspend().unwrap();
        let mut session = registry.resume(id).unwrap();
        assert!(registry.resume(id).unwrap_err().is_illegal_state());

        session.commit().unwrap();
        assert!(registry.resume(id).unwrap_err().is_illegal_state());

        let mut aborted = registry.begin().unwrap();
        let aborted_id = aborted.id();
        aborted.abort().unwrap();
        assert!(registry.resume(aborted_id).unwrap_err().is_illegal_state());
    }

    #[test]
    fn suspend_rejects_foreign_session() {
        let registry = registry();
        let other = self::registry();
        let session = other.begin().unwrap();
        assert!(registry.suspend(session).unwrap_err().is_illegal_state());
        assert_eq!(other.open_sessions(), 0);
    }

    #[test]
    fn transaction_commits_or_aborts() {
        let store = InMemoryStore::new();
        let registry = SessionRegistry::with_config(store.clone(), Config::new().async_listeners(false));

        let user = registry
            .transaction(|s| {
                let user = s.new_entity("User")?;
                user.set_property(s, "login", "a".into())?;
                Ok(user)
            })
            .unwrap();
        assert!(user.id().is_some());
        assert_eq!(store.entity_count(), 1);

        let err = registry
            .transaction(|s| -> CoreResult<()> {
                s.new_entity("User")?;
                Err(CoreError::listener("no"))
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Listener { .. }));
        assert_eq!(store.entity_count(), 1);
        assert_eq!(registry.stats().sessions_committed(), 1);
        assert_eq!(registry.stats().sessions_aborted(), 1);
    }
}
