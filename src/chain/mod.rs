//! Remote ledger integration
//!
//! This module defines the ledger capability consumed by the ingestion pipeline together with
//! the raw payload types it returns, and a Subxt based client for Substrate nodes.

/// Subxt client for Substrate nodes
mod client;
/// Ledger capability and raw payload types
mod types;

pub use client::SubxtLedgerClient;
pub use types::*;
