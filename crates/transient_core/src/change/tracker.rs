//! Per-session change tracker.

use crate::change::{ChangeType, EntityChangeDescription, LinkChange};
use crate::entity::{Entity, EntityState, Identity, TempId};
use crate::error::{CoreError, CoreResult};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use transient_store::{EntityId, StoreTransaction, Value, Version};

/// Snapshot value and buffered value of a property or blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropertyChange<T> {
    pub(crate) old: Option<T>,
    pub(crate) new: Option<T>,
}

impl<T: PartialEq> PropertyChange<T> {
    fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

#[derive(Debug, Clone)]
struct PendingEntity {
    entity: Entity,
    change_type: ChangeType,
    properties: BTreeMap<String, PropertyChange<Value>>,
    blobs: BTreeMap<String, PropertyChange<Vec<u8>>>,
    links: BTreeMap<String, LinkChange>,
}

impl PendingEntity {
    fn new(entity: Entity, change_type: ChangeType) -> Self {
        Self {
            entity,
            change_type,
            properties: BTreeMap::new(),
            blobs: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.blobs.is_empty() && self.links.is_empty()
    }

    fn describe(&self, identity: Identity) -> EntityChangeDescription {
        let changed_properties: BTreeSet<String> = self
            .properties
            .keys()
            .chain(self.blobs.keys())
            .cloned()
            .collect();
        EntityChangeDescription {
            entity: identity,
            type_name: self.entity.type_name().to_string(),
            change_type: self.change_type,
            changed_properties: (!changed_properties.is_empty()).then_some(changed_properties),
            changed_links: (!self.links.is_empty()).then(|| self.links.clone()),
        }
    }
}

/// Buffer of every pending mutation of one session.
///
/// The tracker is the only place session writes live until flush; reads
/// merge it over the store snapshot. It keeps the minimal delta at all
/// times: a change that returns an entity to its snapshot state leaves no
/// trace, and an entity created and removed in the same window is elided.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    entries: HashMap<Identity, PendingEntity>,
    removed: BTreeMap<Identity, Entity>,
    /// Snapshot version of every touched persistent entity, captured on
    /// first touch.
    versions: HashMap<EntityId, Option<Version>>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&mut self, entity: &Entity) -> &mut PendingEntity {
        self.entries
            .entry(entity.identity())
            .or_insert_with(|| PendingEntity::new(entity.clone(), ChangeType::Update))
    }

    /// Drops an Update entry whose changes all cancelled out.
    fn prune(&mut self, identity: &Identity) {
        let empty_update = self
            .entries
            .get(identity)
            .is_some_and(|p| p.change_type == ChangeType::Update && p.is_empty());
        if empty_update {
            self.entries.remove(identity);
        }
    }

    /// Records the snapshot version of an entity the first time it is touched.
    pub(crate) fn touch_version(&mut self, id: EntityId, version: Option<Version>) {
        self.versions.entry(id).or_insert(version);
    }

    /// Records a property write (`new = None` deletes it).
    ///
    /// `old` is the snapshot value; it is only used on the first change of
    /// the property.
    pub(crate) fn record_property_change(
        &mut self,
        entity: &Entity,
        name: &str,
        old: Option<Value>,
        new: Option<Value>,
    ) {
        record(&mut self.pending(entity).properties, name, old, new);
        self.prune(&entity.identity());
    }

    /// Records a blob write (`new = None` deletes it).
    pub(crate) fn record_blob_change(
        &mut self,
        entity: &Entity,
        name: &str,
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) {
        record(&mut self.pending(entity).blobs, name, old, new);
        self.prune(&entity.identity());
    }

    /// Records an added (`added = true`) or removed link target.
    ///
    /// `snapshot` is the link's target set in the snapshot.
    pub(crate) fn record_link_change(
        &mut self,
        entity: &Entity,
        name: &str,
        target: Identity,
        added: bool,
        snapshot: &BTreeSet<Identity>,
    ) {
        let links = &mut self.pending(entity).links;
        let change = links.entry(name.to_string()).or_default();
        if added {
            change.add(target, snapshot);
        } else {
            change.remove(target, snapshot);
        }
        if change.is_empty() {
            links.remove(name);
        }
        self.prune(&entity.identity());
    }

    /// Records a whole-link clear.
    pub(crate) fn record_links_cleared(
        &mut self,
        entity: &Entity,
        name: &str,
        snapshot: &BTreeSet<Identity>,
    ) {
        let links = &mut self.pending(entity).links;
        let change = links.entry(name.to_string()).or_default();
        change.clear(snapshot);
        if change.is_empty() {
            links.remove(name);
        }
        self.prune(&entity.identity());
    }

    /// Records a newly created entity.
    pub(crate) fn record_entity_added(&mut self, entity: &Entity) {
        self.entries
            .insert(entity.identity(), PendingEntity::new(entity.clone(), ChangeType::New));
    }

    /// Records a deleted entity.
    ///
    /// A New entity is elided together with every added link pointing at it.
    pub(crate) fn record_entity_removed(&mut self, entity: &Entity) {
        let identity = entity.identity();
        if let Some(pending) = self.entries.remove(&identity) {
            if pending.change_type == ChangeType::New {
                self.forget_target(&identity);
                return;
            }
        }
        self.removed.insert(identity, entity.clone());
    }

    fn forget_target(&mut self, target: &Identity) {
        let mut emptied = Vec::new();
        for (identity, pending) in &mut self.entries {
            pending.links.retain(|_, change| {
                change.forget(target);
                !change.is_empty()
            });
            if pending.change_type == ChangeType::Update && pending.is_empty() {
                emptied.push(*identity);
            }
        }
        for identity in emptied {
            self.entries.remove(&identity);
        }
    }

    /// Returns the change description of an entity, if it has changes.
    #[must_use]
    pub fn changes_for(&self, identity: &Identity) -> Option<EntityChangeDescription> {
        if let Some(entity) = self.removed.get(identity) {
            return Some(EntityChangeDescription {
                entity: *identity,
                type_name: entity.type_name().to_string(),
                change_type: ChangeType::Remove,
                changed_properties: None,
                changed_links: None,
            });
        }
        self.entries.get(identity).map(|p| p.describe(*identity))
    }

    /// Returns every change description, ordered by identity.
    #[must_use]
    pub fn all_changes(&self) -> Vec<EntityChangeDescription> {
        let identities: BTreeSet<Identity> = self
            .entries
            .keys()
            .chain(self.removed.keys())
            .copied()
            .collect();
        identities
            .iter()
            .filter_map(|identity| self.changes_for(identity))
            .collect()
    }

    /// Returns true if the entity was created in this window.
    #[must_use]
    pub fn is_new(&self, identity: &Identity) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|p| p.change_type == ChangeType::New)
    }

    /// Returns true if the entity was deleted in this window.
    #[must_use]
    pub fn is_removed(&self, identity: &Identity) -> bool {
        self.removed.contains_key(identity)
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removed.is_empty()
    }

    /// Returns the handles of every created or modified entity.
    #[must_use]
    pub fn changed_entities(&self) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self.entries.values().map(|p| p.entity.clone()).collect();
        entities.sort_by_key(Entity::identity);
        entities
    }

    /// Returns the handles of every deleted entity.
    #[must_use]
    pub fn removed_entities(&self) -> Vec<Entity> {
        self.removed.values().cloned().collect()
    }

    /// Returns the type names of every changed or deleted entity.
    #[must_use]
    pub fn affected_types(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .map(|p| &p.entity)
            .chain(self.removed.values())
            .map(|e| e.type_name().to_string())
            .collect()
    }

    /// Returns the snapshot values of the changed properties of an entity.
    #[must_use]
    pub fn old_values(&self, identity: &Identity) -> BTreeMap<String, Option<Value>> {
        self.entries
            .get(identity)
            .map(|p| {
                p.properties
                    .iter()
                    .map(|(name, change)| (name.clone(), change.old.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of entities with pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.removed.len()
    }

    pub(crate) fn property(&self, identity: &Identity, name: &str) -> Option<&PropertyChange<Value>> {
        self.entries.get(identity)?.properties.get(name)
    }

    pub(crate) fn blob(&self, identity: &Identity, name: &str) -> Option<&PropertyChange<Vec<u8>>> {
        self.entries.get(identity)?.blobs.get(name)
    }

    pub(crate) fn link(&self, identity: &Identity, name: &str) -> Option<&LinkChange> {
        self.entries.get(identity)?.links.get(name)
    }

    /// Returns the handle of a tracked entity.
    pub(crate) fn entity(&self, identity: &Identity) -> Option<&Entity> {
        self.entries
            .get(identity)
            .map(|p| &p.entity)
            .or_else(|| self.removed.get(identity))
    }

    /// Returns the handles of New entities of a type, in creation order.
    pub(crate) fn new_entities_of(&self, type_name: &str) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .entries
            .values()
            .filter(|p| p.change_type == ChangeType::New && p.entity.type_name() == type_name)
            .map(|p| p.entity.clone())
            .collect();
        entities.sort_by_key(Entity::identity);
        entities
    }

    /// Returns the captured snapshot versions of touched entities.
    pub(crate) fn versions(&self) -> impl Iterator<Item = (EntityId, Option<Version>)> + '_ {
        self.versions.iter().map(|(id, v)| (*id, *v))
    }

    /// Writes the buffered diff into a store transaction.
    ///
    /// Returns the store IDs allocated for New entities. The handles are not
    /// rebound here; that happens only once the writes are durable.
    pub(crate) fn apply(
        &self,
        txn: &mut dyn StoreTransaction,
    ) -> CoreResult<HashMap<TempId, EntityId>> {
        let mut created = HashMap::new();
        let mut new_entities: Vec<(&TempId, &PendingEntity)> = self
            .entries
            .iter()
            .filter_map(|(identity, p)| match identity {
                Identity::Temporary(temp) => Some((temp, p)),
                Identity::Persistent(_) => None,
            })
            .collect();
        new_entities.sort_by_key(|(temp, _)| **temp);
        for (temp, pending) in new_entities {
            let id = txn.new_entity(pending.entity.type_name())?;
            created.insert(*temp, id);
        }

        let resolve = |identity: &Identity| -> CoreResult<EntityId> {
            match identity {
                Identity::Persistent(id) => Ok(*id),
                Identity::Temporary(temp) => created.get(temp).copied().ok_or_else(|| {
                    CoreError::illegal_state(format!("link to discarded entity {temp}"))
                }),
            }
        };

        for (identity, pending) in &self.entries {
            let id = resolve(identity)?;
            for (name, change) in &pending.properties {
                match &change.new {
                    Some(value) => txn.set_property(id, name, value.clone())?,
                    None => {
                        txn.delete_property(id, name)?;
                    }
                }
            }
            for (name, change) in &pending.blobs {
                match &change.new {
                    Some(data) => txn.set_blob(id, name, data.clone())?,
                    None => {
                        txn.delete_blob(id, name)?;
                    }
                }
            }
            for (name, change) in &pending.links {
                if change.is_cleared() {
                    txn.delete_links(id, name)?;
                }
                for target in change.removed() {
                    txn.delete_link(id, name, resolve(target)?)?;
                }
                for target in change.added() {
                    txn.add_link(id, name, resolve(target)?)?;
                }
            }
        }

        for identity in self.removed.keys() {
            txn.delete_entity(resolve(identity)?)?;
        }
        Ok(created)
    }

    /// Re-expresses the diff against the transaction's (fresh) snapshot.
    ///
    /// Property and blob writes that now equal the snapshot drop out; link
    /// deltas are recomputed against the fresh link state; version tokens
    /// are recaptured.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityRemovedInStore`] if a touched entity no
    /// longer exists.
    pub(crate) fn rebase(&mut self, txn: &dyn StoreTransaction) -> CoreResult<()> {
        for identity in self.removed.keys() {
            if let Identity::Persistent(id) = identity {
                if !txn.exists(*id) {
                    return Err(CoreError::EntityRemovedInStore { entity: *identity });
                }
            }
        }

        let mut emptied = Vec::new();
        for (identity, pending) in &mut self.entries {
            let Identity::Persistent(id) = identity else {
                continue;
            };
            if !txn.exists(*id) {
                return Err(CoreError::EntityRemovedInStore { entity: *identity });
            }
            for (name, change) in &mut pending.properties {
                change.old = txn.get_property(*id, name)?;
            }
            pending.properties.retain(|_, change| !change.is_noop());
            for (name, change) in &mut pending.blobs {
                change.old = txn.get_blob(*id, name)?;
            }
            pending.blobs.retain(|_, change| !change.is_noop());
            for (name, change) in &mut pending.links {
                let fresh: BTreeSet<Identity> = txn
                    .get_links(*id, name)?
                    .into_iter()
                    .map(Identity::Persistent)
                    .collect();
                change.rebase(&fresh);
            }
            pending.links.retain(|_, change| !change.is_empty());
            if pending.is_empty() && pending.change_type == ChangeType::Update {
                emptied.push(*identity);
            }
        }
        for identity in emptied {
            self.entries.remove(&identity);
        }

        for (id, version) in &mut self.versions {
            *version = txn.entity_version(*id);
        }
        Ok(())
    }

    /// Resets the handles of a discarded window: New entities become
    /// RemovedInSession, entities deleted in the window become Saved again.
    pub(crate) fn discard_handles(&self) {
        for pending in self.entries.values() {
            if pending.change_type == ChangeType::New {
                pending.entity.set_state(EntityState::RemovedInSession);
            }
        }
        for entity in self.removed.values() {
            entity.set_state(EntityState::Saved);
        }
    }

    /// Moves the handles to their post-durability states.
    pub(crate) fn settle_handles(&self, created: &HashMap<TempId, EntityId>) {
        for (identity, pending) in &self.entries {
            if let Identity::Temporary(temp) = identity {
                if let Some(id) = created.get(temp) {
                    pending.entity.rebind(*id);
                }
            }
        }
        for entity in self.removed.values() {
            entity.set_state(EntityState::RemovedInStore);
        }
    }
}

fn record<T: PartialEq>(
    changes: &mut BTreeMap<String, PropertyChange<T>>,
    name: &str,
    old: Option<T>,
    new: Option<T>,
) {
    match changes.entry(name.to_string()) {
        Entry::Occupied(mut slot) => {
            slot.get_mut().new = new;
            if slot.get().is_noop() {
                slot.remove();
            }
        }
        Entry::Vacant(slot) => {
            let change = PropertyChange { old, new };
            if !change.is_noop() {
                slot.insert(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use transient_store::TypeId;

    fn saved(n: u64) -> Entity {
        Entity::saved(Arc::from("User"), EntityId::new(TypeId::new(0), n))
    }

    fn transient(n: u64) -> Entity {
        Entity::transient(Arc::from("Issue"), TempId::new(n))
    }

    #[test]
    fn property_change_is_described() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        tracker.record_property_change(&user, "login", Some("a".into()), Some("b".into()));

        let description = tracker.changes_for(&user.identity()).unwrap();
        assert_eq!(description.change_type, ChangeType::Update);
        assert!(description.has_changes_in_property("login"));
        assert!(description.changed_links.is_none());
        assert_eq!(
            tracker.old_values(&user.identity()).get("login"),
            Some(&Some(Value::from("a")))
        );
    }

    #[test]
    fn setting_back_to_snapshot_value_cancels() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        tracker.record_property_change(&user, "login", Some("a".into()), Some("b".into()));
        tracker.record_property_change(&user, "login", Some("b".into()), Some("a".into()));

        assert!(tracker.changes_for(&user.identity()).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn writing_snapshot_value_records_nothing() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        tracker.record_property_change(&user, "login", Some("a".into()), Some("a".into()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn new_entity_stays_tracked_without_changes() {
        let mut tracker = ChangeTracker::new();
        let issue = transient(1);
        tracker.record_entity_added(&issue);
        tracker.record_property_change(&issue, "summary", None, Some("x".into()));
        tracker.record_property_change(&issue, "summary", None, None);

        let description = tracker.changes_for(&issue.identity()).unwrap();
        assert_eq!(description.change_type, ChangeType::New);
        assert!(description.changed_properties.is_none());
        assert!(tracker.is_new(&issue.identity()));
    }

    #[test]
    fn created_and_removed_entity_is_elided() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        let issue = transient(1);
        tracker.record_entity_added(&issue);
        tracker.record_link_change(&user, "issues", issue.identity(), true, &BTreeSet::new());

        tracker.record_entity_removed(&issue);

        assert!(tracker.is_empty());
        assert!(!tracker.is_removed(&issue.identity()));
        assert!(tracker.all_changes().is_empty());
    }

    #[test]
    fn removed_entity_is_reported_as_remove() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        tracker.record_property_change(&user, "login", Some("a".into()), Some("b".into()));
        tracker.record_entity_removed(&user);

        assert!(tracker.is_removed(&user.identity()));
        let description = tracker.changes_for(&user.identity()).unwrap();
        assert_eq!(description.change_type, ChangeType::Remove);
        assert!(description.changed_properties.is_none());
        assert_eq!(tracker.removed_entities().len(), 1);
        assert!(tracker.changed_entities().is_empty());
    }

    #[test]
    fn aggregate_views() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        let issue = transient(2);
        tracker.record_entity_added(&issue);
        tracker.record_link_change(&issue, "reporter", user.identity(), true, &BTreeSet::new());
        tracker.record_blob_change(&user, "avatar", None, Some(vec![1, 2]));

        assert_eq!(tracker.len(), 2);
        assert_eq!(
            tracker.affected_types(),
            ["Issue".to_string(), "User".to_string()].into_iter().collect()
        );
        let all = tracker.all_changes();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entity, user.identity());
        assert!(all[0].has_changes_in_property("avatar"));
        assert!(all[1]
            .link_change("reporter")
            .unwrap()
            .added()
            .contains(&user.identity()));
    }

    #[test]
    fn clear_then_cancel_link() {
        let mut tracker = ChangeTracker::new();
        let user = saved(1);
        let target = saved(2).identity();
        tracker.record_link_change(&user, "watchers", target, true, &BTreeSet::new());
        tracker.record_links_cleared(&user, "watchers", &BTreeSet::new());
        assert!(tracker.is_empty());
    }

    #[test]
    fn clear_then_re_add_snapshot_target() {
        let mut tracker = ChangeTracker::new();
        let issue = saved(1);
        let reporter = saved(2).identity();
        let snapshot: BTreeSet<Identity> = [reporter].into_iter().collect();

        tracker.record_links_cleared(&issue, "reporter", &snapshot);
        assert!(tracker
            .link(&issue.identity(), "reporter")
            .is_some_and(LinkChange::is_cleared));
        tracker.record_link_change(&issue, "reporter", reporter, true, &snapshot);

        assert!(tracker.is_empty());
        assert!(tracker.changes_for(&issue.identity()).is_none());
    }

    #[test]
    fn discard_and_settle_handles() {
        let mut tracker = ChangeTracker::new();
        let issue = transient(1);
        let user = saved(1);
        tracker.record_entity_added(&issue);
        user.set_state(EntityState::RemovedInSession);
        tracker.record_entity_removed(&user);

        tracker.discard_handles();
        assert_eq!(issue.state(), EntityState::RemovedInSession);
        assert_eq!(user.state(), EntityState::Saved);

        let issue = transient(2);
        let mut tracker = ChangeTracker::new();
        tracker.record_entity_added(&issue);
        tracker.record_entity_removed(&user);
        let id = EntityId::new(TypeId::new(1), 0);
        tracker.settle_handles(&[(TempId::new(2), id)].into_iter().collect());
        assert_eq!(issue.id(), Some(id));
        assert_eq!(user.state(), EntityState::RemovedInStore);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(String, i64),
        Delete(String),
        Link(u64),
        Unlink(u64),
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        let name = prop::sample::select(vec!["a".to_string(), "b".to_string()]);
        prop_oneof![
            (name.clone(), 0i64..4).prop_map(|(n, v)| Op::Set(n, v)),
            name.prop_map(Op::Delete),
            (0u64..4).prop_map(Op::Link),
            (0u64..4).prop_map(Op::Unlink),
            Just(Op::Clear),
        ]
    }

    /// Applies an operation the way a session does: against a model of the
    /// snapshot and of the current merged state.
    fn apply(
        tracker: &mut ChangeTracker,
        entity: &Entity,
        snapshot: &(BTreeMap<String, i64>, BTreeSet<u64>),
        current: &mut (BTreeMap<String, i64>, BTreeSet<u64>),
        op: &Op,
    ) {
        let target = |n: u64| Identity::Persistent(EntityId::new(TypeId::new(1), n));
        let links: BTreeSet<Identity> = snapshot.1.iter().map(|n| target(*n)).collect();
        match op {
            Op::Set(name, v) => {
                current.0.insert(name.clone(), *v);
                tracker.record_property_change(
                    entity,
                    name,
                    snapshot.0.get(name).map(|v| Value::Integer(*v)),
                    Some(Value::Integer(*v)),
                );
            }
            Op::Delete(name) => {
                current.0.remove(name);
                tracker.record_property_change(
                    entity,
                    name,
                    snapshot.0.get(name).map(|v| Value::Integer(*v)),
                    None,
                );
            }
            Op::Link(n) => {
                current.1.insert(*n);
                tracker.record_link_change(entity, "l", target(*n), true, &links);
            }
            Op::Unlink(n) => {
                current.1.remove(n);
                tracker.record_link_change(entity, "l", target(*n), false, &links);
            }
            Op::Clear => {
                current.1.clear();
                tracker.record_links_cleared(entity, "l", &links);
            }
        }
    }

    /// Returns the operations that put the slot touched by `op` back to its
    /// snapshot state.
    fn inverse(
        snapshot: &(BTreeMap<String, i64>, BTreeSet<u64>),
        op: &Op,
    ) -> Vec<Op> {
        match op {
            Op::Set(name, _) | Op::Delete(name) => match snapshot.0.get(name) {
                Some(v) => vec![Op::Set(name.clone(), *v)],
                None => vec![Op::Delete(name.clone())],
            },
            Op::Link(n) | Op::Unlink(n) => {
                if snapshot.1.contains(n) {
                    vec![Op::Link(*n)]
                } else {
                    vec![Op::Unlink(*n)]
                }
            }
            Op::Clear => snapshot.1.iter().map(|n| Op::Link(*n)).collect(),
        }
    }

    proptest! {
        #[test]
        fn inverse_mutations_cancel(
            props in prop::collection::btree_map("[ab]", 0i64..4, 0..2),
            links in prop::collection::btree_set(0u64..4, 0..3),
            ops in prop::collection::vec(op(), 0..20),
        ) {
            let snapshot = (props, links);
            let mut current = snapshot.clone();
            let mut tracker = ChangeTracker::new();
            let entity = saved(7);

            for op in &ops {
                apply(&mut tracker, &entity, &snapshot, &mut current, op);
            }
            for op in &ops {
                for undo in inverse(&snapshot, op) {
                    apply(&mut tracker, &entity, &snapshot, &mut current, &undo);
                }
            }

            prop_assert_eq!(&current, &snapshot);
            prop_assert!(tracker.changes_for(&entity.identity()).is_none());
        }

        #[test]
        fn link_delta_sets_stay_disjoint(ops in prop::collection::vec(op(), 0..30)) {
            let snapshot = (BTreeMap::new(), [0u64, 1].into_iter().collect());
            let mut current = snapshot.clone();
            let mut tracker = ChangeTracker::new();
            let entity = saved(3);

            for op in &ops {
                apply(&mut tracker, &entity, &snapshot, &mut current, op);
                if let Some(change) = tracker.link(&entity.identity(), "l") {
                    prop_assert!(change.added().is_disjoint(change.removed()));
                    prop_assert!(!change.is_empty());
                }
            }
        }
    }
}
