//! Persistent store for indexed chain data
//!
//! The pipeline writes through the [`IndexStore`] trait; [`MongoStore`] is the production
//! document store and [`MemoryStore`] an in-process implementation with the same uniqueness
//! rules.

/// MongoDB backed store
mod mongo;
/// Store trait and in-memory implementation
mod repositories;
/// Record types and store errors
mod types;

pub use mongo::MongoStore;
pub use repositories::{IndexStore, MemoryStore, StoreWrite};
pub use types::*;
