use crate::chain::{ChainError, RawBlock};
use crate::ingest::gaps::GapRange;
use crate::store::StoreError;

/// Default number of heights fetched ahead of the one being persisted.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Parameters of a single ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
	/// Explicit first height. Takes priority over `from_latest` and the stored progress.
	pub start: Option<u64>,
	/// Explicit last height. Defaults to the chain height read when the run starts.
	pub end: Option<u64>,
	/// Maximum number of outstanding fetches.
	pub concurrency: usize,
	/// Start at the current chain height instead of resuming from the stored progress.
	pub from_latest: bool,
}

impl Default for IngestOptions {
	fn default() -> Self {
		Self {
			start: None,
			end: None,
			concurrency: DEFAULT_CONCURRENCY,
			from_latest: false,
		}
	}
}

impl IngestOptions {
	/// Fetch window size, never below one.
	pub fn effective_concurrency(&self) -> usize {
		self.concurrency.max(1)
	}
}

/// Identity of the chain being ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
	pub chain_id: String,
	pub chain_name: String,
}

impl ChainInfo {
	pub fn new(chain_id: impl Into<String>, chain_name: impl Into<String>) -> Self {
		Self {
			chain_id: chain_id.into(),
			chain_name: chain_name.into(),
		}
	}
}

/// Result of fetching one height.
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum FetchOutcome {
	Fetched(RawBlock),
	/// The node no longer holds the state for this height; it is skipped permanently.
	Pruned { height: u64, reason: String },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
	pub start_height: u64,
	pub end_height: u64,
	/// Heights whose records were persisted during this run.
	pub heights_indexed: u64,
	/// Heights skipped because their state was pruned.
	pub skipped_heights: Vec<u64>,
	pub last_indexed_block: Option<u64>,
	pub total_blocks: u64,
	pub total_transactions: u64,
	pub total_events: u64,
	/// Missing ranges reported by the gap check before the run.
	pub gaps: Vec<GapRange>,
}

impl IngestReport {
	/// Human readable one-line summary
	pub fn summary(&self) -> String {
		format!(
			"Ingested heights {} to {}: {} indexed, {} skipped, last indexed {}, totals {} blocks / {} transactions / {} events{}",
			self.start_height,
			self.end_height,
			self.heights_indexed,
			self.skipped_heights.len(),
			self.last_indexed_block
				.map_or_else(|| "none".to_string(), |h| h.to_string()),
			self.total_blocks,
			self.total_transactions,
			self.total_events,
			if self.gaps.is_empty() {
				String::new()
			} else {
				format!(" ({} gaps found before the run)", self.gaps.len())
			}
		)
	}
}

/// Error types for the ingestion pipeline
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
	#[error("Ledger error: {0}")]
	Chain(#[from] ChainError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Normalization error at height {height}: {reason}")]
	Normalize { height: u64, reason: String },

	#[error("Fetch task for height {height} failed: {reason}")]
	Task { height: u64, reason: String },

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("Ingestion aborted at height {height}: {source}")]
	Aborted {
		height: u64,
		#[source]
		source: Box<IngestError>,
	},
}

impl IngestError {
	/// The height a run stopped at, if it was aborted.
	pub fn failed_height(&self) -> Option<u64> {
		match self {
			Self::Aborted { height, .. } => Some(*height),
			_ => None,
		}
	}
}
