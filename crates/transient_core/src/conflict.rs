//! Optimistic conflict detection.
//!
//! A session captures the snapshot version of every entity it touches. Before
//! writing, those tokens are compared with the latest committed versions;
//! the store repeats the same check atomically while publishing. Entities
//! the session only read are never compared.

use crate::change::ChangeTracker;
use std::fmt;
use transient_store::{EntityId, StoreError, StoreTransaction, Version};

/// A touched entity whose committed version moved past the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictReport {
    /// The conflicting entity.
    pub entity: EntityId,
    /// Version seen in the snapshot (`None` if absent there).
    pub expected: Option<Version>,
    /// Latest committed version (`None` if deleted since).
    pub actual: Option<Version>,
}

impl ConflictReport {
    /// Extracts a report from a store conflict error.
    #[must_use]
    pub fn from_store_error(err: &StoreError) -> Option<Self> {
        match err {
            StoreError::VersionConflict {
                entity,
                expected,
                actual,
            } => Some(Self {
                entity: *entity,
                expected: *expected,
                actual: *actual,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed: expected {:?}, found {:?}",
            self.entity, self.expected, self.actual
        )
    }
}

/// Compares captured version tokens with the store.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Returns the first touched entity whose version changed, in ID order.
    #[must_use]
    pub fn detect(tracker: &ChangeTracker, txn: &dyn StoreTransaction) -> Option<ConflictReport> {
        let mut versions: Vec<(EntityId, Option<Version>)> = tracker.versions().collect();
        versions.sort_by_key(|(id, _)| *id);
        versions.into_iter().find_map(|(entity, expected)| {
            let actual = txn.latest_version(entity);
            (actual != expected).then_some(ConflictReport {
                entity,
                expected,
                actual,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use std::sync::Arc;
    use transient_store::{InMemoryStore, Store, Value};

    fn committed_user(store: &InMemoryStore) -> EntityId {
        let mut txn = store.begin_transaction().unwrap();
        let id = txn.new_entity("User").unwrap();
        txn.set_property(id, "login", Value::from("a")).unwrap();
        txn.flush().unwrap();
        id
    }

    #[test]
    fn untouched_entities_are_ignored() {
        let store = InMemoryStore::new();
        let id = committed_user(&store);
        let txn = store.begin_transaction().unwrap();

        let mut other = store.begin_transaction().unwrap();
        other.set_property(id, "login", Value::from("b")).unwrap();
        other.flush().unwrap();

        let tracker = ChangeTracker::new();
        assert_eq!(ConflictDetector::detect(&tracker, txn.as_ref()), None);
    }

    #[test]
    fn touched_entity_changed_elsewhere() {
        let store = InMemoryStore::new();
        let id = committed_user(&store);
        let txn = store.begin_transaction().unwrap();

        let mut tracker = ChangeTracker::new();
        let user = Entity::saved(Arc::from("User"), id);
        tracker.touch_version(id, txn.entity_version(id));
        tracker.record_property_change(&user, "login", Some("a".into()), Some("c".into()));
        assert_eq!(ConflictDetector::detect(&tracker, txn.as_ref()), None);

        let mut other = store.begin_transaction().unwrap();
        other.set_property(id, "login", Value::from("b")).unwrap();
        other.flush().unwrap();

        let report = ConflictDetector::detect(&tracker, txn.as_ref()).unwrap();
        assert_eq!(report.entity, id);
        assert_eq!(report.expected, txn.entity_version(id));
        assert_eq!(report.actual, store.latest_version(id));
    }

    #[test]
    fn report_from_store_error() {
        let id = EntityId::new(transient_store::TypeId::new(0), 1);
        let err = StoreError::VersionConflict {
            entity: id,
            expected: None,
            actual: Some(Version::new(2)),
        };
        assert_eq!(ConflictReport::from_store_error(&err).unwrap().entity, id);
        assert!(ConflictReport::from_store_error(&StoreError::entity_not_found(id)).is_none());
    }
}
