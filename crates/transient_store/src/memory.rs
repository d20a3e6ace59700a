//! In-memory multi-version store.

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, StoreTransaction};
use crate::types::{EntityId, TypeId, Value, Version};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct EntityRecord {
    version: Version,
    properties: BTreeMap<String, Value>,
    blobs: BTreeMap<String, Vec<u8>>,
    links: BTreeMap<String, BTreeSet<EntityId>>,
}

impl EntityRecord {
    fn new(version: Version) -> Self {
        Self {
            version,
            properties: BTreeMap::new(),
            blobs: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }
}

/// One immutable committed state of the store.
#[derive(Debug, Clone, Default)]
struct StoreData {
    version: Version,
    entities: BTreeMap<EntityId, EntityRecord>,
}

#[derive(Debug, Default)]
struct TypeRegistry {
    names: Vec<String>,
    by_name: HashMap<String, TypeId>,
    /// Next local ID per type, indexed by type ID.
    next_local: Vec<u64>,
}

impl TypeRegistry {
    fn get_or_create(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = TypeId::new(self.names.len() as u32);
        self.names.push(name.to_string());
        self.next_local.push(0);
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn allocate(&mut self, name: &str) -> EntityId {
        let type_id = self.get_or_create(name);
        let slot = &mut self.next_local[type_id.as_u32() as usize];
        let local_id = *slot;
        *slot += 1;
        EntityId::new(type_id, local_id)
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: RwLock<Arc<StoreData>>,
    /// Serializes conflict checks with publication of a new state.
    commit_lock: Mutex<()>,
    types: Mutex<TypeRegistry>,
}

/// An in-memory, copy-on-write, multi-version store.
///
/// Every commit publishes a new immutable state; transactions keep
/// the `Arc` they started on, which gives them snapshot isolation for free.
/// Commits copy the entity map, so this store is meant for tests and small
/// ephemeral datasets rather than large volumes.
///
/// # Thread Safety
///
/// The store is a cheap cloneable handle and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use transient_store::{InMemoryStore, Store, StoreTransaction, Value};
///
/// let store = InMemoryStore::new();
/// let mut txn = store.begin_transaction().unwrap();
/// let id = txn.new_entity("Issue").unwrap();
/// txn.set_property(id, "summary", Value::from("crash")).unwrap();
/// txn.flush().unwrap();
/// assert!(store.latest_version(id).is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a concrete in-memory transaction.
    #[must_use]
    pub fn begin(&self) -> InMemoryTransaction {
        let snapshot = Arc::clone(&self.shared.committed.read());
        InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            view: Arc::clone(&snapshot),
            snapshot,
            written: BTreeMap::new(),
        }
    }

    /// Returns the number of entities in the latest committed state.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.shared.committed.read().entities.len()
    }
}

impl Store for InMemoryStore {
    fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(self.begin()))
    }

    fn type_id(&self, name: &str) -> TypeId {
        self.shared.types.lock().get_or_create(name)
    }

    fn type_name(&self, type_id: TypeId) -> Option<String> {
        self.shared
            .types
            .lock()
            .names
            .get(type_id.as_u32() as usize)
            .cloned()
    }

    fn latest_version(&self, entity: EntityId) -> Option<Version> {
        self.shared
            .committed
            .read()
            .entities
            .get(&entity)
            .map(|r| r.version)
    }

    fn version(&self) -> Version {
        self.shared.committed.read().version
    }
}

/// A transaction on an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    /// Committed state the transaction started (or last flushed) on.
    snapshot: Arc<StoreData>,
    /// Snapshot plus this transaction's own writes.
    view: Arc<StoreData>,
    /// Written entities and their version in `snapshot` (None if created here).
    written: BTreeMap<EntityId, Option<Version>>,
}

impl InMemoryTransaction {
    fn record(&self, entity: EntityId) -> StoreResult<&EntityRecord> {
        self.view
            .entities
            .get(&entity)
            .ok_or_else(|| StoreError::entity_not_found(entity))
    }

    fn record_mut(&mut self, entity: EntityId) -> StoreResult<&mut EntityRecord> {
        if !self.view.entities.contains_key(&entity) {
            return Err(StoreError::entity_not_found(entity));
        }
        let before = self.snapshot.entities.get(&entity).map(|r| r.version);
        self.written.entry(entity).or_insert(before);
        Arc::make_mut(&mut self.view)
            .entities
            .get_mut(&entity)
            .ok_or_else(|| StoreError::entity_not_found(entity))
    }

    fn lookup_type(&self, type_name: &str) -> Option<TypeId> {
        self.shared.types.lock().by_name.get(type_name).copied()
    }

    fn refresh(&mut self) {
        self.snapshot = Arc::clone(&self.shared.committed.read());
        self.view = Arc::clone(&self.snapshot);
        self.written.clear();
    }

    /// Checks the write set against the latest state and publishes it.
    fn publish(&mut self) -> StoreResult<Version> {
        if self.written.is_empty() {
            self.refresh();
            return Ok(self.snapshot.version);
        }

        let _guard = self.shared.commit_lock.lock();
        let current = Arc::clone(&self.shared.committed.read());

        for (entity, expected) in &self.written {
            let actual = current.entities.get(entity).map(|r| r.version);
            if actual != *expected {
                tracing::debug!(%entity, ?expected, ?actual, "write-write conflict");
                return Err(StoreError::VersionConflict {
                    entity: *entity,
                    expected: *expected,
                    actual,
                });
            }
        }

        let version = current.version.next();
        let mut next = (*current).clone();
        for entity in self.written.keys() {
            match self.view.entities.get(entity) {
                Some(record) => {
                    let mut record = record.clone();
                    record.version = version;
                    next.entities.insert(*entity, record);
                }
                None => {
                    next.entities.remove(entity);
                }
            }
        }
        next.version = version;

        let next = Arc::new(next);
        *self.shared.committed.write() = Arc::clone(&next);
        tracing::trace!(%version, written = self.written.len(), "published");

        self.snapshot = Arc::clone(&next);
        self.view = next;
        self.written.clear();
        Ok(version)
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn snapshot_version(&self) -> Version {
        self.snapshot.version
    }

    fn new_entity(&mut self, type_name: &str) -> StoreResult<EntityId> {
        let id = self.shared.types.lock().allocate(type_name);
        let version = self.snapshot.version;
        Arc::make_mut(&mut self.view)
            .entities
            .insert(id, EntityRecord::new(version));
        self.written.insert(id, None);
        Ok(id)
    }

    fn exists(&self, entity: EntityId) -> bool {
        self.view.entities.contains_key(&entity)
    }

    fn delete_entity(&mut self, entity: EntityId) -> StoreResult<()> {
        self.record_mut(entity)?;
        Arc::make_mut(&mut self.view).entities.remove(&entity);
        Ok(())
    }

    fn get_property(&self, entity: EntityId, name: &str) -> StoreResult<Option<Value>> {
        Ok(self.record(entity)?.properties.get(name).cloned())
    }

    fn set_property(&mut self, entity: EntityId, name: &str, value: Value) -> StoreResult<()> {
        self.record_mut(entity)?
            .properties
            .insert(name.to_string(), value);
        Ok(())
    }

    fn delete_property(&mut self, entity: EntityId, name: &str) -> StoreResult<bool> {
        Ok(self.record_mut(entity)?.properties.remove(name).is_some())
    }

    fn get_blob(&self, entity: EntityId, name: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.record(entity)?.blobs.get(name).cloned())
    }

    fn set_blob(&mut self, entity: EntityId, name: &str, data: Vec<u8>) -> StoreResult<()> {
        self.record_mut(entity)?.blobs.insert(name.to_string(), data);
        Ok(())
    }

    fn delete_blob(&mut self, entity: EntityId, name: &str) -> StoreResult<bool> {
        Ok(self.record_mut(entity)?.blobs.remove(name).is_some())
    }

    fn add_link(&mut self, entity: EntityId, name: &str, target: EntityId) -> StoreResult<bool> {
        Ok(self
            .record_mut(entity)?
            .links
            .entry(name.to_string())
            .or_default()
            .insert(target))
    }

    fn delete_link(
        &mut self,
        entity: EntityId,
        name: &str,
        target: EntityId,
    ) -> StoreResult<bool> {
        let record = self.record_mut(entity)?;
        let removed = match record.links.get_mut(name) {
            Some(targets) => targets.remove(&target),
            None => false,
        };
        if record.links.get(name).is_some_and(BTreeSet::is_empty) {
            record.links.remove(name);
        }
        Ok(removed)
    }

    fn delete_links(&mut self, entity: EntityId, name: &str) -> StoreResult<()> {
        self.record_mut(entity)?.links.remove(name);
        Ok(())
    }

    fn get_links(&self, entity: EntityId, name: &str) -> StoreResult<Vec<EntityId>> {
        let record = self.record(entity)?;
        Ok(record
            .links
            .get(name)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|t| self.view.entities.contains_key(t))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_all(&self, type_name: &str) -> StoreResult<Vec<EntityId>> {
        let Some(type_id) = self.lookup_type(type_name) else {
            return Ok(Vec::new());
        };
        Ok(self
            .view
            .entities
            .keys()
            .filter(|id| id.type_id() == type_id)
            .copied()
            .collect())
    }

    fn find(&self, type_name: &str, property: &str, value: &Value) -> StoreResult<Vec<EntityId>> {
        let Some(type_id) = self.lookup_type(type_name) else {
            return Ok(Vec::new());
        };
        Ok(self
            .view
            .entities
            .iter()
            .filter(|(id, record)| {
                id.type_id() == type_id && record.properties.get(property) == Some(value)
            })
            .map(|(id, _)| *id)
            .collect())
    }

    fn entity_version(&self, entity: EntityId) -> Option<Version> {
        self.snapshot.entities.get(&entity).map(|r| r.version)
    }

    fn latest_version(&self, entity: EntityId) -> Option<Version> {
        self.shared
            .committed
            .read()
            .entities
            .get(&entity)
            .map(|r| r.version)
    }

    fn flush(&mut self) -> StoreResult<Version> {
        self.publish()
    }

    fn commit(mut self: Box<Self>) -> StoreResult<Version> {
        self.publish()
    }

    fn abort(self: Box<Self>) {}

    fn revert(&mut self) {
        self.refresh();
    }

    fn has_pending_writes(&self) -> bool {
        !self.written.is_empty()
    }
}
