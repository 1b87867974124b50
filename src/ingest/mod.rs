//! Ingestion Module
//!
//! This module provides the core logic for ingesting the history of a chain into the store.
//! It is composed of several submodules, each responsible for a specific aspect of a run:
//!
//! - `orchestrator`: The entry point of a run. It resolves the range and wires together all services.
//! - `fetcher`: Ordered, bounded-concurrency fetching of blocks from the remote ledger.
//! - `retry`: Error classification and the backoff policies wrapped around remote calls.
//! - `normalizer`: Converts fetched blocks into block, transaction and event records.
//! - `progress_tracker`: Tracks the resume checkpoint and the counts of a run.
//! - `gaps`: Reports heights missing from the store before a run starts.
//! - `events`: Progress updates and the sinks that receive them.

/// Progress updates and sinks
pub mod events;
/// Ordered block fetching
pub mod fetcher;
/// Gap detection over persisted heights
pub mod gaps;
/// Block normalization into records
pub mod normalizer;
/// Main coordinator of an ingestion run
pub mod orchestrator;
/// Tracks ingestion progress and checkpoints
pub mod progress_tracker;
/// Retry and backoff policy
pub mod retry;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{LoggingProgressSink, ProgressDispatcher, ProgressSink, ProgressUpdate};
pub use gaps::{GapRange, detect_gaps, find_gaps};
pub use orchestrator::IngestPipeline;
pub use retry::{NETWORK_FAULT_DELAY, RetryConfig, is_network_transient, is_pruned_state, retry_with};
pub use types::*;
