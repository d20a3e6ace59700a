//! Entity identities and proxies.

mod identity;
mod proxy;

pub use identity::{Identity, TempId};
pub use proxy::{Entity, EntityState};
