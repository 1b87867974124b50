//! Command line and environment configuration of the ingestion binary.

use crate::ingest::{ChainInfo, DEFAULT_CONCURRENCY, IngestError, IngestOptions, RetryConfig};

use clap::Parser;
use std::time::Duration;

/// Ingest the history of a Substrate chain into MongoDB.
#[derive(Parser, Debug, Clone)]
#[command(name = "substrate-ingest", version, about)]
pub struct IngestArgs {
	/// WebSocket RPC endpoint of the node.
	#[arg(long, env = "INGEST_RPC_URL", default_value = "ws://127.0.0.1:9944")]
	pub rpc_url: String,

	/// MongoDB connection string.
	#[arg(long, env = "INGEST_MONGO_URI", default_value = "mongodb://127.0.0.1:27017")]
	pub mongo_uri: String,

	/// Database the collections live in.
	#[arg(long, env = "INGEST_DATABASE", default_value = "substrate_ingest")]
	pub database: String,

	/// Identifier the records and the progress checkpoint are stored under.
	#[arg(long, env = "INGEST_CHAIN_ID")]
	pub chain_id: String,

	/// Display name of the chain. Defaults to the chain id.
	#[arg(long, env = "INGEST_CHAIN_NAME")]
	pub chain_name: Option<String>,

	/// First height to ingest. Defaults to the height after the last indexed block.
	#[arg(long)]
	pub start: Option<u64>,

	/// Last height to ingest. Defaults to the chain height at startup.
	#[arg(long)]
	pub end: Option<u64>,

	/// Maximum number of blocks fetched concurrently.
	#[arg(long, env = "INGEST_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
	pub concurrency: usize,

	/// Start at the current chain height instead of resuming.
	#[arg(long, conflicts_with = "start")]
	pub latest: bool,

	/// Seconds to wait before retrying a call that failed on the network.
	#[arg(long, env = "INGEST_RETRY_DELAY_SECS", default_value_t = 30)]
	pub retry_delay_secs: u64,

	/// Heights between two progress log lines.
	#[arg(long, default_value_t = 1000)]
	pub progress_log_interval: u64,
}

impl IngestArgs {
	/// Reject values clap cannot check on its own.
	pub fn validate(&self) -> Result<(), IngestError> {
		if self.chain_id.trim().is_empty() {
			return Err(IngestError::Config("chain id must not be empty".to_string()));
		}
		if self.retry_delay_secs == 0 {
			return Err(IngestError::Config(
				"retry delay must be at least one second".to_string(),
			));
		}
		Ok(())
	}

	pub fn options(&self) -> IngestOptions {
		IngestOptions {
			start: self.start,
			end: self.end,
			concurrency: self.concurrency,
			from_latest: self.latest,
		}
	}

	pub fn chain(&self) -> ChainInfo {
		ChainInfo::new(
			self.chain_id.clone(),
			self.chain_name.clone().unwrap_or_else(|| self.chain_id.clone()),
		)
	}

	/// Fixed-delay policy used around ledger calls.
	pub fn network_retry(&self) -> RetryConfig {
		RetryConfig::network_fault(Duration::from_secs(self.retry_delay_secs))
	}
}
