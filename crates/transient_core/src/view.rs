//! Merged read view of a session.

use crate::change::ChangeTracker;
use crate::entity::Identity;
use crate::error::CoreResult;
use std::collections::BTreeSet;
use transient_store::{StoreTransaction, Value};

/// Pending changes layered over the store snapshot.
///
/// Everything a session reads goes through this view, so callers and
/// constraints see their own uncommitted writes.
#[derive(Clone, Copy)]
pub struct SessionView<'a> {
    tracker: &'a ChangeTracker,
    txn: &'a dyn StoreTransaction,
}

impl<'a> SessionView<'a> {
    pub(crate) fn new(tracker: &'a ChangeTracker, txn: &'a dyn StoreTransaction) -> Self {
        Self { tracker, txn }
    }

    /// Returns the change tracker behind this view.
    #[must_use]
    pub fn tracker(&self) -> &'a ChangeTracker {
        self.tracker
    }

    /// Reads a property.
    pub fn property(&self, entity: &Identity, name: &str) -> CoreResult<Option<Value>> {
        if let Some(change) = self.tracker.property(entity, name) {
            return Ok(change.new.clone());
        }
        self.snapshot_property(entity, name)
    }

    /// Reads a property from the snapshot, ignoring pending changes.
    pub fn snapshot_property(&self, entity: &Identity, name: &str) -> CoreResult<Option<Value>> {
        match entity {
            Identity::Persistent(id) if self.txn.exists(*id) => {
                Ok(self.txn.get_property(*id, name)?)
            }
            _ => Ok(None),
        }
    }

    /// Reads a blob.
    pub fn blob(&self, entity: &Identity, name: &str) -> CoreResult<Option<Vec<u8>>> {
        if let Some(change) = self.tracker.blob(entity, name) {
            return Ok(change.new.clone());
        }
        self.snapshot_blob(entity, name)
    }

    /// Reads a blob from the snapshot.
    pub fn snapshot_blob(&self, entity: &Identity, name: &str) -> CoreResult<Option<Vec<u8>>> {
        match entity {
            Identity::Persistent(id) if self.txn.exists(*id) => Ok(self.txn.get_blob(*id, name)?),
            _ => Ok(None),
        }
    }

    /// Returns the link targets in the snapshot.
    pub fn snapshot_links(&self, entity: &Identity, name: &str) -> CoreResult<BTreeSet<Identity>> {
        match entity {
            Identity::Persistent(id) if self.txn.exists(*id) => Ok(self
                .txn
                .get_links(*id, name)?
                .into_iter()
                .map(Identity::Persistent)
                .collect()),
            _ => Ok(BTreeSet::new()),
        }
    }

    /// Returns the current link targets, ascending.
    ///
    /// Targets deleted in the session are hidden.
    pub fn links(&self, entity: &Identity, name: &str) -> CoreResult<Vec<Identity>> {
        let mut targets = match self.tracker.link(entity, name) {
            Some(change) if change.is_cleared() => BTreeSet::new(),
            _ => self.snapshot_links(entity, name)?,
        };
        if let Some(change) = self.tracker.link(entity, name) {
            for target in change.removed() {
                targets.remove(target);
            }
            targets.extend(change.added().iter().copied());
        }
        Ok(targets
            .into_iter()
            .filter(|t| !self.tracker.is_removed(t))
            .collect())
    }

    /// Returns true if the entity is deleted, in the session or the store.
    #[must_use]
    pub fn is_removed(&self, entity: &Identity) -> bool {
        if self.tracker.is_removed(entity) {
            return true;
        }
        match entity {
            Identity::Persistent(id) => !self.txn.exists(*id),
            Identity::Temporary(_) => !self.tracker.is_new(entity),
        }
    }

    /// Returns every live entity of a type.
    pub fn all(&self, type_name: &str) -> CoreResult<Vec<Identity>> {
        let mut found: Vec<Identity> = self
            .txn
            .get_all(type_name)?
            .into_iter()
            .map(Identity::Persistent)
            .filter(|identity| !self.tracker.is_removed(identity))
            .collect();
        found.extend(
            self.tracker
                .new_entities_of(type_name)
                .iter()
                .map(|e| e.identity()),
        );
        Ok(found)
    }

    /// Returns every live entity of a type whose property equals `value`.
    pub fn find(&self, type_name: &str, property: &str, value: &Value) -> CoreResult<Vec<Identity>> {
        let mut found: BTreeSet<Identity> = self
            .txn
            .find(type_name, property, value)?
            .into_iter()
            .map(Identity::Persistent)
            .filter(|identity| {
                !self.tracker.is_removed(identity)
                    && self.tracker.property(identity, property).is_none()
            })
            .collect();
        for entity in self.tracker.changed_entities() {
            if entity.type_name() != type_name {
                continue;
            }
            let identity = entity.identity();
            if let Some(change) = self.tracker.property(&identity, property) {
                if change.new.as_ref() == Some(value) {
                    found.insert(identity);
                }
            }
        }
        Ok(found.into_iter().collect())
    }
}
