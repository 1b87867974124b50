//!
//! Utility module for the ingestion service.
//!
//! Formatting helpers shared by the chain client.
/// Hash formatting helpers
pub mod index;

pub use index::format_hash;
