//! # Transient Store
//!
//! Versioned entity store interface consumed by the Transient session layer.
//!
//! The session layer never talks to a persistence engine directly. It goes
//! through the [`Store`] and [`StoreTransaction`] traits defined here, which
//! describe a key/property/link store where every entity carries a version
//! token that changes on each committed write.
//!
//! ## Design Principles
//!
//! - Transactions read from an immutable snapshot
//! - Writes become visible to others only on `flush` or `commit`
//! - `flush`/`commit` fail with [`StoreError::VersionConflict`] when an entity
//!   written by the transaction changed since its snapshot
//! - No on-disk format is defined here
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Copy-on-write multi-version store for tests and
//!   ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use transient_store::{InMemoryStore, Store, StoreTransaction, Value};
//!
//! let store = InMemoryStore::new();
//! let mut txn = store.begin_transaction().unwrap();
//! let id = txn.new_entity("User").unwrap();
//! txn.set_property(id, "login", Value::from("vadim")).unwrap();
//! txn.commit().unwrap();
//!
//! let txn = store.begin_transaction().unwrap();
//! assert_eq!(txn.get_property(id, "login").unwrap(), Some(Value::from("vadim")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use store::{Store, StoreTransaction};
pub use types::{EntityId, TypeId, Value, Version};
