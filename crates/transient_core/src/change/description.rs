//! Change descriptions.

use crate::entity::{Identity, TempId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use transient_store::EntityId;

/// Kind of change made to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Entity was created in the session.
    New,
    /// Existing entity was modified.
    Update,
    /// Existing entity was deleted.
    Remove,
}

/// Delta of a single link of an entity.
///
/// A target never appears in both `added` and `removed`: an opposite
/// operation on the same target cancels the earlier one. When `cleared` is
/// set, every target present in the snapshot is gone and `added` holds the
/// complete new target set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkChange {
    added: BTreeSet<Identity>,
    removed: BTreeSet<Identity>,
    cleared: bool,
}

impl LinkChange {
    /// Creates a delta from its parts.
    ///
    /// Targets present in both sets are dropped from both.
    pub fn from_parts(
        added: impl IntoIterator<Item = Identity>,
        removed: impl IntoIterator<Item = Identity>,
        cleared: bool,
    ) -> Self {
        let mut added: BTreeSet<Identity> = added.into_iter().collect();
        let mut removed: BTreeSet<Identity> = removed.into_iter().collect();
        let both: Vec<Identity> = added.intersection(&removed).copied().collect();
        for target in both {
            added.remove(&target);
            removed.remove(&target);
        }
        Self {
            added,
            removed,
            cleared,
        }
    }

    /// Returns the targets added in the session.
    #[must_use]
    pub fn added(&self) -> &BTreeSet<Identity> {
        &self.added
    }

    /// Returns the targets removed in the session.
    #[must_use]
    pub fn removed(&self) -> &BTreeSet<Identity> {
        &self.removed
    }

    /// Returns true if the whole link was cleared.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Returns true if the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.cleared
    }

    /// Records an added target. `snapshot` is the link's target set in the
    /// snapshot.
    pub(crate) fn add(&mut self, target: Identity, snapshot: &BTreeSet<Identity>) {
        if !self.removed.remove(&target) && (self.cleared || !snapshot.contains(&target)) {
            self.added.insert(target);
        }
        self.normalize(snapshot);
    }

    /// Records a removed target.
    pub(crate) fn remove(&mut self, target: Identity, snapshot: &BTreeSet<Identity>) {
        if !self.added.remove(&target) && !self.cleared && snapshot.contains(&target) {
            self.removed.insert(target);
        }
        self.normalize(snapshot);
    }

    /// Records a whole-link clear.
    pub(crate) fn clear(&mut self, snapshot: &BTreeSet<Identity>) {
        self.added.clear();
        self.removed.clear();
        self.cleared = self.cleared || !snapshot.is_empty();
    }

    /// Turns a clear whose re-added targets cover the whole snapshot back
    /// into plain additions.
    fn normalize(&mut self, snapshot: &BTreeSet<Identity>) {
        if self.cleared && snapshot.is_subset(&self.added) {
            self.cleared = false;
            self.added.retain(|t| !snapshot.contains(t));
        }
    }

    /// Drops a target from both sets.
    pub(crate) fn forget(&mut self, target: &Identity) {
        self.added.remove(target);
        self.removed.remove(target);
    }

    /// Re-expresses the delta against a fresh snapshot link state.
    pub(crate) fn rebase(&mut self, fresh: &BTreeSet<Identity>) {
        if self.cleared {
            self.cleared = !fresh.is_empty();
            self.normalize(fresh);
            return;
        }
        self.added.retain(|t| !fresh.contains(t));
        self.removed.retain(|t| fresh.contains(t));
    }

    fn resolve(&self, created: &HashMap<TempId, EntityId>) -> Self {
        let map = |set: &BTreeSet<Identity>| set.iter().map(|t| resolve(t, created)).collect();
        Self {
            added: map(&self.added),
            removed: map(&self.removed),
            cleared: self.cleared,
        }
    }
}

fn resolve(identity: &Identity, created: &HashMap<TempId, EntityId>) -> Identity {
    match identity {
        Identity::Temporary(temp) => created
            .get(temp)
            .map_or(*identity, |id| Identity::Persistent(*id)),
        Identity::Persistent(_) => *identity,
    }
}

/// Description of all pending changes of one entity.
///
/// `None` in `changed_properties` or `changed_links` means "no changes of
/// this kind"; an empty collection is never reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChangeDescription {
    /// The changed entity.
    pub entity: Identity,
    /// Type name of the entity.
    pub type_name: String,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Names of changed properties and blobs.
    pub changed_properties: Option<BTreeSet<String>>,
    /// Per-link deltas.
    pub changed_links: Option<BTreeMap<String, LinkChange>>,
}

impl EntityChangeDescription {
    /// Returns true if the named property or blob changed.
    #[must_use]
    pub fn has_changes_in_property(&self, name: &str) -> bool {
        self.changed_properties
            .as_ref()
            .is_some_and(|props| props.contains(name))
    }

    /// Returns the delta of the named link.
    #[must_use]
    pub fn link_change(&self, name: &str) -> Option<&LinkChange> {
        self.changed_links.as_ref().and_then(|links| links.get(name))
    }

    /// Returns true if the named link changed.
    #[must_use]
    pub fn has_changes_in_link(&self, name: &str) -> bool {
        self.link_change(name).is_some()
    }

    /// Replaces temporary identities with the store IDs they received.
    #[must_use]
    pub fn resolve(&self, created: &HashMap<TempId, EntityId>) -> Self {
        Self {
            entity: resolve(&self.entity, created),
            type_name: self.type_name.clone(),
            change_type: self.change_type,
            changed_properties: self.changed_properties.clone(),
            changed_links: self.changed_links.as_ref().map(|links| {
                links
                    .iter()
                    .map(|(name, change)| (name.clone(), change.resolve(created)))
                    .collect()
            }),
        }
    }
}
