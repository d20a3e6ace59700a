//! Test fixtures and registry helpers.

use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use transient_core::{
    Cardinality, ChangeType, Config, EntityChangeDescription, EntityEvent, EntityPhase,
    EntityTypeSchema, ListenerId, Schema, Session, SessionEvent, SessionPhase, SessionRegistry,
    ViolationSet,
};
use transient_store::{EntityId, InMemoryStore, Store, StoreTransaction, Value, Version};

/// Schema of a tiny issue tracker.
///
/// - `User`: `login` is required and unique
/// - `Issue`: exactly one `reporter`, any number of `watchers`
pub fn issue_tracker_schema() -> Schema {
    Schema::new()
        .with_type(
            EntityTypeSchema::new("User")
                .required("login")
                .unique(["login"]),
        )
        .with_type(
            EntityTypeSchema::new("Issue")
                .link("reporter", Cardinality::One)
                .link("watchers", Cardinality::Many),
        )
}

/// A session registry over a fresh in-memory store.
pub struct TestRegistry {
    registry: SessionRegistry,
}

impl TestRegistry {
    /// Creates a registry with the issue tracker schema and the default
    /// configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a registry whose async listeners run inline on the
    /// flushing thread.
    pub fn synchronous() -> Self {
        Self::with_config(Config::default().async_listeners(false))
    }

    /// Creates a registry with the issue tracker schema.
    pub fn with_config(config: Config) -> Self {
        Self::with_schema(issue_tracker_schema(), config)
    }

    /// Creates a registry with a custom schema.
    pub fn with_schema(schema: Schema, config: Config) -> Self {
        let registry = SessionRegistry::builder(InMemoryStore::new())
            .config(config)
            .schema(schema)
            .build();
        Self { registry }
    }

    /// Returns the underlying registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Commits a new `User` and returns its ID.
    pub fn create_user(&self, login: &str) -> EntityId {
        let user = self
            .registry
            .transaction(|session| {
                let user = session.new_entity("User")?;
                user.set_property(session, "login", Value::from(login))?;
                Ok(user)
            })
            .expect("Failed to create user");
        user.id().expect("Committed user should have an ID")
    }

    /// Commits a new `Issue` reported by `reporter` and returns its ID.
    pub fn create_issue(&self, summary: &str, reporter: EntityId) -> EntityId {
        let issue = self
            .registry
            .transaction(|session| {
                let reporter = load(session, reporter);
                let issue = session.new_entity("Issue")?;
                issue.set_property(session, "summary", Value::from(summary))?;
                issue.add_link(session, "reporter", &reporter)?;
                Ok(issue)
            })
            .expect("Failed to create issue");
        issue.id().expect("Committed issue should have an ID")
    }

    /// Reads a committed property, bypassing the session layer.
    pub fn read_property(&self, id: EntityId, name: &str) -> Option<Value> {
        let txn = self
            .store()
            .begin_transaction()
            .expect("Failed to begin store transaction");
        txn.get_property(id, name).expect("Failed to read property")
    }

    /// Reads a committed text property.
    pub fn read_text(&self, id: EntityId, name: &str) -> Option<String> {
        self.read_property(id, name)
            .and_then(|v| v.as_text().map(str::to_string))
    }

    /// Reads committed link targets.
    pub fn read_links(&self, id: EntityId, name: &str) -> Vec<EntityId> {
        let txn = self
            .store()
            .begin_transaction()
            .expect("Failed to begin store transaction");
        txn.get_links(id, name).expect("Failed to read links")
    }

    /// Returns true if the entity exists in the latest committed state.
    pub fn exists(&self, id: EntityId) -> bool {
        self.store().latest_version(id).is_some()
    }

    /// Returns the latest committed store version.
    pub fn store_version(&self) -> Version {
        self.store().version()
    }

    /// Commits a property write directly in the store, as a concurrent
    /// writer outside the session layer would.
    pub fn write_directly(&self, id: EntityId, name: &str, value: Value) {
        let mut txn = self
            .store()
            .begin_transaction()
            .expect("Failed to begin store transaction");
        txn.set_property(id, name, value)
            .expect("Failed to write property");
        txn.commit().expect("Failed to commit direct write");
    }

    /// Deletes an entity directly in the store.
    pub fn delete_directly(&self, id: EntityId) {
        let mut txn = self
            .store()
            .begin_transaction()
            .expect("Failed to begin store transaction");
        txn.delete_entity(id).expect("Failed to delete entity");
        txn.commit().expect("Failed to commit direct delete");
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestRegistry {
    type Target = SessionRegistry;

    fn deref(&self) -> &Self::Target {
        &self.registry
    }
}

/// Loads a committed entity into a session.
///
/// # Panics
///
/// Panics if the entity is not visible to the session.
pub fn load(session: &Session, id: EntityId) -> transient_core::Entity {
    session
        .get_entity(id)
        .expect("Failed to load entity")
        .expect("Entity should exist in the session snapshot")
}

/// Runs a test with a fresh test registry.
///
/// # Example
///
/// ```rust
/// use transient_testkit::with_test_registry;
///
/// with_test_registry(|registry| {
///     let mut session = registry.begin().unwrap();
///     let user = session.new_entity("User").unwrap();
///     assert!(user.is_new());
/// });
/// ```
pub fn with_test_registry<F, R>(f: F) -> R
where
    F: FnOnce(&TestRegistry) -> R,
{
    let registry = TestRegistry::synchronous();
    f(&registry)
}

/// Runs a test with a fresh test registry using `config`.
pub fn with_registry_config<F, R>(config: Config, f: F) -> R
where
    F: FnOnce(&TestRegistry) -> R,
{
    let registry = TestRegistry::with_config(config);
    f(&registry)
}

/// One event captured by an [`EventLog`].
#[derive(Debug, Clone)]
pub enum RecordedEvent {
    /// A session event.
    Session {
        /// Pipeline phase.
        phase: SessionPhase,
        /// Changes carried by the event.
        changes: Vec<EntityChangeDescription>,
        /// Violations, for constraint failures.
        violations: Option<ViolationSet>,
    },
    /// An entity event.
    Entity {
        /// Pipeline phase.
        phase: EntityPhase,
        /// Kind of change.
        change_type: ChangeType,
        /// Full change description.
        description: EntityChangeDescription,
    },
}

/// Thread-safe recorder of listener events.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session listener and an entity listener recording into
    /// this log.
    pub fn attach(&self, registry: &SessionRegistry) -> (ListenerId, ListenerId) {
        let sessions = self.clone();
        let session_id = registry.add_session_listener(
            move |_: &mut Session, event: &SessionEvent| {
                sessions.record_session(event);
                Ok(())
            },
        );
        let entities = self.clone();
        let entity_id = registry.add_entity_listener(move |event: &EntityEvent| {
            entities.record_entity(event);
            Ok(())
        });
        (session_id, entity_id)
    }

    /// Records a session event.
    pub fn record_session(&self, event: &SessionEvent) {
        self.events.lock().push(RecordedEvent::Session {
            phase: event.phase,
            changes: event.changes.clone(),
            violations: event.violations.clone(),
        });
    }

    /// Records an entity event.
    pub fn record_entity(&self, event: &EntityEvent) {
        self.events.lock().push(RecordedEvent::Entity {
            phase: event.phase,
            change_type: event.change_type,
            description: event.description.clone(),
        });
    }

    /// Returns every recorded event in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the change lists of every session event in `phase`.
    pub fn session_changes(&self, phase: SessionPhase) -> Vec<Vec<EntityChangeDescription>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Session { phase: p, changes, .. } if *p == phase => {
                    Some(changes.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Returns the violation sets reported to session listeners.
    pub fn violations(&self) -> Vec<ViolationSet> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Session {
                    violations: Some(violations),
                    ..
                } => Some(violations.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the descriptions of every entity event in `phase`.
    pub fn entity_changes(&self, phase: EntityPhase) -> Vec<EntityChangeDescription> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Entity {
                    phase: p,
                    description,
                    ..
                } if *p == phase => Some(description.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
