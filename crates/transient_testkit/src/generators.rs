//! Property-based test generators.
//!
//! Strategies produce random session mutations against a fixed vocabulary
//! of property, blob and link names, so that generated sequences keep
//! hitting the same slots and exercise the tracker's cancellation rules.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use transient_core::{CoreResult, Entity, Identity, Session};
use transient_store::Value;

/// Property names used by generated mutations.
pub const PROPERTY_NAMES: &[&str] = &["summary", "priority", "state"];

/// Blob names used by generated mutations.
pub const BLOB_NAMES: &[&str] = &["attachment"];

/// Link names used by generated mutations.
pub const LINK_NAMES: &[&str] = &["watchers", "duplicates"];

/// One mutation of a single entity.
///
/// Link targets are indices into a caller-provided target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Set a property.
    SetProperty {
        /// Property name.
        name: String,
        /// New value.
        value: Value,
    },
    /// Delete a property.
    DeleteProperty {
        /// Property name.
        name: String,
    },
    /// Set a blob.
    SetBlob {
        /// Blob name.
        name: String,
        /// New content.
        data: Vec<u8>,
    },
    /// Delete a blob.
    DeleteBlob {
        /// Blob name.
        name: String,
    },
    /// Add a link target.
    AddLink {
        /// Link name.
        name: String,
        /// Index of the target.
        target: usize,
    },
    /// Remove a link target.
    RemoveLink {
        /// Link name.
        name: String,
        /// Index of the target.
        target: usize,
    },
    /// Clear a link.
    ClearLinks {
        /// Link name.
        name: String,
    },
}

/// Strategy for non-null property values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::Integer),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

/// Strategy for property names.
pub fn property_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(PROPERTY_NAMES).prop_map(str::to_string)
}

/// Strategy for blob names.
pub fn blob_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(BLOB_NAMES).prop_map(str::to_string)
}

/// Strategy for link names.
pub fn link_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(LINK_NAMES).prop_map(str::to_string)
}

/// Strategy for any mutation. Clears are rarer than the other kinds so that
/// generated sequences still build up link state.
pub fn mutation_strategy(targets: usize) -> impl Strategy<Value = Mutation> {
    let targets = targets.max(1);
    prop_oneof![
        3 => (property_name_strategy(), value_strategy())
            .prop_map(|(name, value)| Mutation::SetProperty { name, value }),
        3 => property_name_strategy().prop_map(|name| Mutation::DeleteProperty { name }),
        2 => (
            blob_name_strategy(),
            prop::collection::vec(any::<u8>(), 0..16)
        )
            .prop_map(|(name, data)| Mutation::SetBlob { name, data }),
        2 => blob_name_strategy().prop_map(|name| Mutation::DeleteBlob { name }),
        4 => (link_name_strategy(), 0..targets)
            .prop_map(|(name, target)| Mutation::AddLink { name, target }),
        4 => (link_name_strategy(), 0..targets)
            .prop_map(|(name, target)| Mutation::RemoveLink { name, target }),
        1 => link_name_strategy().prop_map(|name| Mutation::ClearLinks { name }),
    ]
}

/// Strategy for a sequence of mutations.
pub fn mutations_strategy(targets: usize, max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(targets), 0..max_len)
}

/// Applies one mutation to `entity`.
///
/// # Panics
///
/// Panics if a link mutation refers to a target index out of range.
pub fn apply_mutation(
    session: &mut Session,
    entity: &Entity,
    targets: &[Entity],
    mutation: &Mutation,
) -> CoreResult<()> {
    match mutation {
        Mutation::SetProperty { name, value } => {
            session.set_property(entity, name, value.clone())
        }
        Mutation::DeleteProperty { name } => session.delete_property(entity, name),
        Mutation::SetBlob { name, data } => session.set_blob(entity, name, data.clone()),
        Mutation::DeleteBlob { name } => session.delete_blob(entity, name),
        Mutation::AddLink { name, target } => session.add_link(entity, name, &targets[*target]),
        Mutation::RemoveLink { name, target } => {
            session.remove_link(entity, name, &targets[*target])
        }
        Mutation::ClearLinks { name } => session.clear_links(entity, name),
    }
}

/// State of one entity over the generator vocabulary, as seen by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    properties: BTreeMap<String, Option<Value>>,
    blobs: BTreeMap<String, Option<Vec<u8>>>,
    links: BTreeMap<String, BTreeSet<Identity>>,
}

impl EntitySnapshot {
    /// Captures the current values of every generator slot.
    pub fn capture(session: &Session, entity: &Entity) -> CoreResult<Self> {
        let mut properties = BTreeMap::new();
        for name in PROPERTY_NAMES {
            properties.insert(name.to_string(), session.get_property(entity, name)?);
        }
        let mut blobs = BTreeMap::new();
        for name in BLOB_NAMES {
            blobs.insert(name.to_string(), session.get_blob(entity, name)?);
        }
        let mut links = BTreeMap::new();
        for name in LINK_NAMES {
            let targets = session
                .get_links(entity, name)?
                .iter()
                .map(Entity::identity)
                .collect();
            links.insert(name.to_string(), targets);
        }
        Ok(Self {
            properties,
            blobs,
            links,
        })
    }

    /// Writes the captured values back through `session`.
    ///
    /// `targets` must contain every entity the captured links point to.
    pub fn restore(&self, session: &mut Session, entity: &Entity, targets: &[Entity]) -> CoreResult<()> {
        for (name, value) in &self.properties {
            match value {
                Some(value) => session.set_property(entity, name, value.clone())?,
                None => session.delete_property(entity, name)?,
            }
        }
        for (name, data) in &self.blobs {
            match data {
                Some(data) => session.set_blob(entity, name, data.clone())?,
                None => session.delete_blob(entity, name)?,
            }
        }
        for (name, wanted) in &self.links {
            let current: BTreeSet<Identity> = session
                .get_links(entity, name)?
                .iter()
                .map(Entity::identity)
                .collect();
            for target in targets {
                let identity = target.identity();
                match (current.contains(&identity), wanted.contains(&identity)) {
                    (true, false) => session.remove_link(entity, name, target)?,
                    (false, true) => session.add_link(entity, name, target)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
