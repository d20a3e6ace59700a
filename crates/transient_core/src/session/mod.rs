//! Sessions.
//!
//! A [`Session`] is the transaction boundary of the transient layer. It owns
//! a [`ChangeTracker`] buffering every mutation and a store transaction
//! providing the snapshot reads are isolated against.
//!
//! ```text
//!            flush ok
//!          ┌──────────┐
//!          ▼          │
//! begin ─▶ Open ─▶ Flushing ─▶ Committed
//!          │  ▲       │
//!  suspend │  │resume └──────▶ Aborted
//!          ▼  │
//!         Parked
//! ```

mod pipeline;
mod registry;

pub use registry::{RegistryBuilder, SessionRegistry};
pub(crate) use registry::{ParkedSession, RegistryShared};

use crate::change::ChangeTracker;
use crate::entity::{Entity, EntityState, Identity};
use crate::error::{CoreError, CoreResult};
use crate::types::{SessionId, SessionState};
use crate::view::SessionView;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use transient_store::{EntityId, StoreTransaction, Value};

/// A transient session.
///
/// Sessions are `Send`: move one to another thread directly, or park it in
/// its [`SessionRegistry`] with [`Session::suspend`] and take it back
/// anywhere with [`SessionRegistry::resume`].
///
/// Dropping an open session aborts it.
pub struct Session {
    id: SessionId,
    state: SessionState,
    tracker: ChangeTracker,
    /// One handle per stored entity, so every handle the session hands out
    /// for an entity shares its state.
    handles: Mutex<HashMap<EntityId, Entity>>,
    txn: Option<Box<dyn StoreTransaction>>,
    shared: Arc<RegistryShared>,
}

impl Session {
    pub(crate) fn attach(id: SessionId, parked: ParkedSession, shared: Arc<RegistryShared>) -> Self {
        Self {
            id,
            state: parked.state,
            tracker: parked.tracker,
            handles: Mutex::new(parked.handles),
            txn: Some(parked.txn),
            shared,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true while the session accepts operations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Returns true after a successful commit.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == SessionState::Committed
    }

    /// Returns true after an abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state == SessionState::Aborted
    }

    /// Returns the pending changes.
    #[must_use]
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Returns true if the session has unflushed changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.tracker.is_empty()
    }

    /// Returns the merged read view.
    pub fn view(&self) -> CoreResult<SessionView<'_>> {
        Ok(SessionView::new(&self.tracker, self.txn()?))
    }

    fn txn(&self) -> CoreResult<&dyn StoreTransaction> {
        match (&self.txn, self.state.is_terminal()) {
            (Some(txn), false) => Ok(&**txn),
            _ => Err(CoreError::illegal_state(format!(
                "{} is {:?}",
                self.id, self.state
            ))),
        }
    }

    /// Checks that the entity may be changed and records its version token.
    fn prepare_mutation(&mut self, entity: &Entity) -> CoreResult<()> {
        let txn = self.txn()?;
        let identity = entity.identity();
        if entity.is_removed() || self.tracker.is_removed(&identity) {
            return Err(CoreError::illegal_state(format!(
                "{entity} is removed and cannot be changed"
            )));
        }
        match identity {
            Identity::Persistent(id) => {
                if !txn.exists(id) {
                    entity.set_state(EntityState::RemovedInStore);
                    return Err(CoreError::illegal_state(format!(
                        "{entity} no longer exists in the store"
                    )));
                }
                let version = txn.entity_version(id);
                self.tracker.touch_version(id, version);
                self.handles
                    .get_mut()
                    .entry(id)
                    .or_insert_with(|| entity.clone());
            }
            Identity::Temporary(_) => {
                if !self.tracker.is_new(&identity) {
                    return Err(CoreError::illegal_state(format!(
                        "{entity} belongs to another session"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_target(&self, target: &Entity) -> CoreResult<()> {
        let view = self.view()?;
        if target.is_removed() || view.is_removed(&target.identity()) {
            return Err(CoreError::illegal_state(format!(
                "cannot link to removed entity {target}"
            )));
        }
        Ok(())
    }

    /// Returns the session's handle for an identity, creating it on first
    /// access.
    fn handle(&self, identity: Identity) -> CoreResult<Entity> {
        match identity {
            Identity::Persistent(id) => {
                let mut handles = self.handles.lock();
                if let Some(entity) = handles.get(&id) {
                    return Ok(entity.clone());
                }
                let entity = match self.tracker.entity(&identity) {
                    Some(entity) => entity.clone(),
                    None => self.saved_handle(id)?,
                };
                handles.insert(id, entity.clone());
                Ok(entity)
            }
            Identity::Temporary(temp) => self.tracker.entity(&identity).cloned().ok_or_else(|| {
                CoreError::illegal_state(format!("unknown temporary entity {temp}"))
            }),
        }
    }

    fn saved_handle(&self, id: EntityId) -> CoreResult<Entity> {
        let type_name = self
            .shared
            .store
            .type_name(id.type_id())
            .ok_or_else(|| CoreError::illegal_state(format!("unknown type of entity {id}")))?;
        Ok(Entity::saved(Arc::from(type_name), id))
    }

    fn handles(&self, identities: Vec<Identity>) -> CoreResult<Vec<Entity>> {
        identities.into_iter().map(|i| self.handle(i)).collect()
    }

    /// Creates a new entity. It receives a store ID on its first flush.
    pub fn new_entity(&mut self, type_name: &str) -> CoreResult<Entity> {
        self.txn()?;
        let entity = Entity::transient(Arc::from(type_name), self.shared.next_temp_id());
        self.tracker.record_entity_added(&entity);
        tracing::trace!(session = %self.id, %entity, "entity created");
        Ok(entity)
    }

    /// Loads an entity by store ID.
    ///
    /// Returns `None` if it does not exist in the snapshot or was deleted in
    /// this session.
    pub fn get_entity(&self, id: EntityId) -> CoreResult<Option<Entity>> {
        let identity = Identity::Persistent(id);
        if self.view()?.is_removed(&identity) {
            return Ok(None);
        }
        self.handle(identity).map(Some)
    }

    /// Returns every entity of a type, including New ones.
    pub fn get_all(&self, type_name: &str) -> CoreResult<Vec<Entity>> {
        let identities = self.view()?.all(type_name)?;
        self.handles(identities)
    }

    /// Returns every entity of a type whose property equals `value`.
    pub fn find(&self, type_name: &str, property: &str, value: &Value) -> CoreResult<Vec<Entity>> {
        let identities = self.view()?.find(type_name, property, value)?;
        self.handles(identities)
    }

    /// Reads a property of an entity.
    pub fn get_property(&self, entity: &Entity, name: &str) -> CoreResult<Option<Value>> {
        self.view()?.property(&entity.identity(), name)
    }

    /// Writes a property of an entity.
    pub fn set_property(&mut self, entity: &Entity, name: &str, value: Value) -> CoreResult<()> {
        self.write_property(entity, name, Some(value))
    }

    /// Removes a property of an entity.
    pub fn delete_property(&mut self, entity: &Entity, name: &str) -> CoreResult<()> {
        self.write_property(entity, name, None)
    }

    fn write_property(&mut self, entity: &Entity, name: &str, value: Option<Value>) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        let old = self.view()?.snapshot_property(&entity.identity(), name)?;
        self.tracker.record_property_change(entity, name, old, value);
        Ok(())
    }

    /// Reads a blob of an entity.
    pub fn get_blob(&self, entity: &Entity, name: &str) -> CoreResult<Option<Vec<u8>>> {
        self.view()?.blob(&entity.identity(), name)
    }

    /// Writes a blob of an entity.
    pub fn set_blob(&mut self, entity: &Entity, name: &str, data: Vec<u8>) -> CoreResult<()> {
        self.write_blob(entity, name, Some(data))
    }

    /// Removes a blob of an entity.
    pub fn delete_blob(&mut self, entity: &Entity, name: &str) -> CoreResult<()> {
        self.write_blob(entity, name, None)
    }

    fn write_blob(&mut self, entity: &Entity, name: &str, data: Option<Vec<u8>>) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        let old = self.view()?.snapshot_blob(&entity.identity(), name)?;
        self.tracker.record_blob_change(entity, name, old, data);
        Ok(())
    }

    /// Returns every target of a link, ascending by identity.
    pub fn get_links(&self, entity: &Entity, name: &str) -> CoreResult<Vec<Entity>> {
        let identities = self.view()?.links(&entity.identity(), name)?;
        self.handles(identities)
    }

    /// Returns the first target of a link.
    pub fn get_link(&self, entity: &Entity, name: &str) -> CoreResult<Option<Entity>> {
        let first = self.view()?.links(&entity.identity(), name)?.into_iter().next();
        first.map(|identity| self.handle(identity)).transpose()
    }

    /// Adds a link target.
    pub fn add_link(&mut self, entity: &Entity, name: &str, target: &Entity) -> CoreResult<()> {
        self.write_link(entity, name, target, true)
    }

    /// Removes a link target.
    pub fn remove_link(&mut self, entity: &Entity, name: &str, target: &Entity) -> CoreResult<()> {
        self.write_link(entity, name, target, false)
    }

    fn write_link(
        &mut self,
        entity: &Entity,
        name: &str,
        target: &Entity,
        added: bool,
    ) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        if added {
            self.check_target(target)?;
        }
        let snapshot = self.view()?.snapshot_links(&entity.identity(), name)?;
        self.tracker
            .record_link_change(entity, name, target.identity(), added, &snapshot);
        Ok(())
    }

    /// Removes every target of a link.
    pub fn clear_links(&mut self, entity: &Entity, name: &str) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        let snapshot = self.view()?.snapshot_links(&entity.identity(), name)?;
        self.tracker.record_links_cleared(entity, name, &snapshot);
        Ok(())
    }

    /// Replaces every target of a link with `target`.
    pub fn set_link(&mut self, entity: &Entity, name: &str, target: &Entity) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        self.check_target(target)?;
        self.clear_links(entity, name)?;
        self.add_link(entity, name, target)
    }

    /// Deletes an entity.
    ///
    /// A New entity is forgotten together with every link added to it.
    pub fn delete_entity(&mut self, entity: &Entity) -> CoreResult<()> {
        self.prepare_mutation(entity)?;
        self.tracker.record_entity_removed(entity);
        entity.set_state(EntityState::RemovedInSession);
        tracing::trace!(session = %self.id, %entity, "entity deleted");
        Ok(())
    }

    /// Discards every pending change and moves to the latest committed state.
    pub fn revert(&mut self) -> CoreResult<()> {
        self.txn()?;
        let tracker = std::mem::take(&mut self.tracker);
        tracker.discard_handles();
        if let Some(txn) = self.txn.as_mut() {
            txn.revert();
        }
        tracing::debug!(session = %self.id, discarded = tracker.len(), "session reverted");
        Ok(())
    }

    /// Aborts the session, discarding every pending change.
    ///
    /// Aborting an aborted session does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] if the session was committed.
    pub fn abort(&mut self) -> CoreResult<()> {
        match self.state {
            SessionState::Aborted => Ok(()),
            SessionState::Committed => Err(CoreError::illegal_state(format!(
                "{} is already committed",
                self.id
            ))),
            SessionState::Open | SessionState::Flushing => {
                self.abort_now();
                Ok(())
            }
        }
    }

    /// Aborts the session and hands `cause` back, for use as
    /// `return Err(session.abort_with(err))`.
    pub fn abort_with(&mut self, cause: CoreError) -> CoreError {
        if let Err(err) = self.abort() {
            tracing::debug!(session = %self.id, error = %err, "abort after commit ignored");
        }
        cause
    }

    pub(crate) fn abort_now(&mut self) {
        let tracker = std::mem::take(&mut self.tracker);
        tracker.discard_handles();
        self.handles.get_mut().clear();
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
        self.state = SessionState::Aborted;
        self.shared.release(self.id);
        self.shared.stats.record_abort();
        tracing::debug!(session = %self.id, discarded = tracker.len(), "session aborted");
    }

    /// Parks the session in its registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalState`] unless the session is open; the
    /// session is dropped (and aborted if needed) in that case.
    pub fn suspend(mut self) -> CoreResult<SessionId> {
        if self.state != SessionState::Open {
            return Err(CoreError::illegal_state(format!(
                "cannot suspend {} in state {:?}",
                self.id, self.state
            )));
        }
        let txn = self
            .txn
            .take()
            .ok_or_else(|| CoreError::illegal_state(format!("{} has no transaction", self.id)))?;
        let parked = ParkedSession {
            state: self.state,
            tracker: std::mem::take(&mut self.tracker),
            handles: std::mem::take(self.handles.get_mut()),
            txn,
        };
        self.shared.park(self.id, parked);
        tracing::debug!(session = %self.id, "session suspended");
        Ok(self.id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.txn.is_some() && !self.state.is_terminal() {
            tracing::debug!(session = %self.id, "open session dropped");
            self.abort_now();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.tracker.len())
            .finish()
    }
}
