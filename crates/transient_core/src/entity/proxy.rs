//! Entity proxy handles.

use crate::entity::{Identity, TempId};
use crate::error::CoreResult;
use crate::session::Session;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use transient_store::{EntityId, Value};

/// Lifecycle state of an entity proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Created in a session, not yet written to the store.
    New,
    /// Exists in the store.
    Saved,
    /// Deleted in the session (or discarded before being written).
    RemovedInSession,
    /// Deleted from the store.
    RemovedInStore,
}

impl EntityState {
    /// Returns true for both removed states.
    #[must_use]
    pub fn is_removed(self) -> bool {
        matches!(self, Self::RemovedInSession | Self::RemovedInStore)
    }
}

#[derive(Debug)]
struct Binding {
    identity: Identity,
    state: EntityState,
}

#[derive(Debug)]
struct EntityCell {
    type_name: Arc<str>,
    binding: RwLock<Binding>,
}

/// A lightweight handle over an entity.
///
/// Clones share one binding, so when a New entity is written and receives
/// its store ID every clone observes the new identity at once. The handle
/// holds no data: reads and writes go through the [`Session`] passed to
/// each call.
///
/// # Example
///
/// ```rust,ignore
/// let user = session.new_entity("User")?;
/// user.set_property(&mut session, "login", "vadim".into())?;
/// session.flush()?;
/// assert!(user.id().is_some());
/// ```
#[derive(Clone)]
pub struct Entity {
    cell: Arc<EntityCell>,
}

impl Entity {
    fn with_binding(type_name: Arc<str>, identity: Identity, state: EntityState) -> Self {
        Self {
            cell: Arc::new(EntityCell {
                type_name,
                binding: RwLock::new(Binding { identity, state }),
            }),
        }
    }

    /// Creates a handle for a not-yet-written entity.
    pub(crate) fn transient(type_name: Arc<str>, temp: TempId) -> Self {
        Self::with_binding(type_name, Identity::Temporary(temp), EntityState::New)
    }

    /// Creates a handle for an entity that exists in the store.
    pub(crate) fn saved(type_name: Arc<str>, id: EntityId) -> Self {
        Self::with_binding(type_name, Identity::Persistent(id), EntityState::Saved)
    }

    /// Returns the current identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.cell.binding.read().identity
    }

    /// Returns the store ID once the entity has been written.
    #[must_use]
    pub fn id(&self) -> Option<EntityId> {
        self.identity().persistent()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.cell.binding.read().state
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.cell.type_name
    }

    /// Returns true while the entity has not been written.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state() == EntityState::New
    }

    /// Returns true if the entity was removed.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.state().is_removed()
    }

    /// Replaces the temporary identity with the store ID.
    ///
    /// Happens exactly once; later calls are ignored.
    pub(crate) fn rebind(&self, id: EntityId) {
        let mut binding = self.cell.binding.write();
        if binding.identity.is_temporary() {
            binding.identity = Identity::Persistent(id);
            binding.state = EntityState::Saved;
        }
    }

    pub(crate) fn set_state(&self, state: EntityState) {
        self.cell.binding.write().state = state;
    }

    /// Returns true if both handles share one binding.
    #[must_use]
    pub fn same_handle(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Reads a property.
    pub fn get_property(&self, session: &Session, name: &str) -> CoreResult<Option<Value>> {
        session.get_property(self, name)
    }

    /// Writes a property.
    pub fn set_property(&self, session: &mut Session, name: &str, value: Value) -> CoreResult<()> {
        session.set_property(self, name, value)
    }

    /// Removes a property.
    pub fn delete_property(&self, session: &mut Session, name: &str) -> CoreResult<()> {
        session.delete_property(self, name)
    }

    /// Reads a blob.
    pub fn get_blob(&self, session: &Session, name: &str) -> CoreResult<Option<Vec<u8>>> {
        session.get_blob(self, name)
    }

    /// Writes a blob.
    pub fn set_blob(&self, session: &mut Session, name: &str, data: Vec<u8>) -> CoreResult<()> {
        session.set_blob(self, name, data)
    }

    /// Removes a blob.
    pub fn delete_blob(&self, session: &mut Session, name: &str) -> CoreResult<()> {
        session.delete_blob(self, name)
    }

    /// Returns every target of a link.
    pub fn get_links(&self, session: &Session, name: &str) -> CoreResult<Vec<Entity>> {
        session.get_links(self, name)
    }

    /// Returns the first target of a link.
    pub fn get_link(&self, session: &Session, name: &str) -> CoreResult<Option<Entity>> {
        session.get_link(self, name)
    }

    /// Adds a link target.
    pub fn add_link(&self, session: &mut Session, name: &str, target: &Entity) -> CoreResult<()> {
        session.add_link(self, name, target)
    }

    /// Replaces every target of a link with a single one.
    pub fn set_link(&self, session: &mut Session, name: &str, target: &Entity) -> CoreResult<()> {
        session.set_link(self, name, target)
    }

    /// Removes a link target.
    pub fn remove_link(
        &self,
        session: &mut Session,
        name: &str,
        target: &Entity,
    ) -> CoreResult<()> {
        session.remove_link(self, name, target)
    }

    /// Removes every target of a link.
    pub fn clear_links(&self, session: &mut Session, name: &str) -> CoreResult<()> {
        session.clear_links(self, name)
    }

    /// Deletes the entity.
    pub fn delete(&self, session: &mut Session) -> CoreResult<()> {
        session.delete_entity(self)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other) || self.identity() == other.identity()
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.cell.binding.read();
        f.debug_struct("Entity")
            .field("type", &self.cell.type_name)
            .field("identity", &binding.identity)
            .field("state", &binding.state)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.cell.type_name, self.identity())
    }
}
