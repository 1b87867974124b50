//! Ingestion of Substrate chain history into a document store.
//!
//! The [`ingest::IngestPipeline`] fetches blocks from a [`chain::LedgerApi`] with bounded
//! concurrency, normalizes them into block, transaction and event records and writes them through
//! a [`store::IndexStore`] strictly in height order, checkpointing progress after every height so
//! that an interrupted run resumes where it stopped.

pub mod chain;
pub mod config;
pub mod ingest;
pub mod store;
pub mod utils;
