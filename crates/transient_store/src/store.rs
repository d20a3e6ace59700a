//! Store trait definitions.

use crate::error::StoreResult;
use crate::types::{EntityId, TypeId, Value, Version};

/// A versioned entity store.
///
/// The store hands out transactions that read from a snapshot and buffer
/// their writes until `flush` or `commit`. It also answers version queries
/// against the latest committed state, which is what the session layer's
/// conflict detector compares snapshots against.
///
/// # Invariants
///
/// - `latest_version` of an entity changes on every committed write to it
/// - A transaction never observes writes committed after its snapshot,
///   except its own
/// - Implementations must be `Send + Sync` for concurrent sessions
pub trait Store: Send + Sync {
    /// Begins a transaction on the latest committed snapshot.
    fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Returns the ID for a type name, registering it if needed.
    fn type_id(&self, name: &str) -> TypeId;

    /// Returns the name of a registered type.
    fn type_name(&self, type_id: TypeId) -> Option<String>;

    /// Returns the latest committed version of an entity, or `None` if the
    /// entity does not exist in the latest committed state.
    fn latest_version(&self, entity: EntityId) -> Option<Version>;

    /// Returns the store-wide committed version.
    fn version(&self) -> Version;
}

/// A transaction against a [`Store`].
///
/// Reads see the snapshot the transaction was started (or last flushed) on,
/// plus the transaction's own pending writes.
pub trait StoreTransaction: Send {
    /// Returns the store-wide version this transaction reads at.
    fn snapshot_version(&self) -> Version;

    /// Allocates a new entity of the given type.
    fn new_entity(&mut self, type_name: &str) -> StoreResult<EntityId>;

    /// Checks whether an entity exists in this transaction's view.
    fn exists(&self, entity: EntityId) -> bool;

    /// Deletes an entity with all of its properties, blobs and links.
    fn delete_entity(&mut self, entity: EntityId) -> StoreResult<()>;

    /// Reads a property.
    fn get_property(&self, entity: EntityId, name: &str) -> StoreResult<Option<Value>>;

    /// Writes a property.
    fn set_property(&mut self, entity: EntityId, name: &str, value: Value) -> StoreResult<()>;

    /// Removes a property. Returns true if it existed.
    fn delete_property(&mut self, entity: EntityId, name: &str) -> StoreResult<bool>;

    /// Reads a blob.
    fn get_blob(&self, entity: EntityId, name: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes a blob.
    fn set_blob(&mut self, entity: EntityId, name: &str, data: Vec<u8>) -> StoreResult<()>;

    /// Removes a blob. Returns true if it existed.
    fn delete_blob(&mut self, entity: EntityId, name: &str) -> StoreResult<bool>;

    /// Adds a link. Returns true if the link was not present.
    fn add_link(&mut self, entity: EntityId, name: &str, target: EntityId) -> StoreResult<bool>;

    /// Removes a link. Returns true if the link was present.
    fn delete_link(&mut self, entity: EntityId, name: &str, target: EntityId)
        -> StoreResult<bool>;

    /// Removes every target of a link.
    fn delete_links(&mut self, entity: EntityId, name: &str) -> StoreResult<()>;

    /// Returns the targets of a link that exist in this transaction's view,
    /// in ascending ID order.
    fn get_links(&self, entity: EntityId, name: &str) -> StoreResult<Vec<EntityId>>;

    /// Returns every entity of a type.
    fn get_all(&self, type_name: &str) -> StoreResult<Vec<EntityId>>;

    /// Returns every entity of a type whose property equals `value`.
    fn find(&self, type_name: &str, property: &str, value: &Value) -> StoreResult<Vec<EntityId>>;

    /// Returns the version of an entity as seen by this transaction's snapshot.
    fn entity_version(&self, entity: EntityId) -> Option<Version>;

    /// Returns the latest committed version of an entity, bypassing the snapshot.
    fn latest_version(&self, entity: EntityId) -> Option<Version>;

    /// Makes pending writes durable and moves the snapshot to the latest
    /// committed state, keeping the transaction open.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::VersionConflict`] without writing anything
    /// if an entity written by this transaction changed since the snapshot.
    fn flush(&mut self) -> StoreResult<Version>;

    /// Makes pending writes durable and ends the transaction.
    ///
    /// # Errors
    ///
    /// Same conflict semantics as [`StoreTransaction::flush`].
    fn commit(self: Box<Self>) -> StoreResult<Version>;

    /// Discards pending writes and ends the transaction.
    fn abort(self: Box<Self>);

    /// Discards pending writes and moves the snapshot to the latest
    /// committed state, keeping the transaction open.
    fn revert(&mut self);

    /// Returns true if the transaction holds unflushed writes.
    fn has_pending_writes(&self) -> bool;
}
