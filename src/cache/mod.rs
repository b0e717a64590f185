//! Versioned, lease-locked resource cache and its store contract.
//!
//! # Architecture
//!
//! 1. **[`ResourceCache`]**: lease, versions, entry naming and record
//!    (de)serialization. All cache rules live here.
//! 2. **[`PersistentStore`]**: hierarchical node store with typed
//!    attributes and per-node compare-and-swap. No cache rules.
//! 3. **[`InMemoryStore`]**: `DashMap`-backed reference store.

#[allow(clippy::module_inception)]
mod cache;
pub mod memory;
pub mod path;
pub mod store;

pub use cache::ResourceCache;
pub use memory::InMemoryStore;
pub use store::{AttrValue, AttributeChanges, Attributes, PersistentStore, StoreNode};

pub use crate::config::CacheConfig;
