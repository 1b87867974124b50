//! Ingestion pipeline and integration point for all ingestion services.
//!
//! This module defines the `IngestPipeline`, which coordinates a run over a height range: it
//! resolves the range from the options and the stored progress, runs the advisory gap check,
//! drains the [`FetchQueue`] and for every height normalizes the fetched block, persists its
//! records and then the resume checkpoint, before notifying the progress sinks.
//!
//! Heights are handled one at a time in ascending order while later fetches are already in
//! flight, so the records and the checkpoint of height `h` are always written before anything
//! of height `h + 1`. A fatal error pins the checkpoint at the last confirmed height and ends the
//! run; running again resumes right after it.

use crate::chain::LedgerApi;
use crate::ingest::{
	events::{ProgressDispatcher, ProgressSink, ProgressUpdate},
	fetcher::FetchQueue,
	gaps::detect_gaps,
	normalizer::BlockNormalizer,
	progress_tracker::{DEFAULT_LOG_INTERVAL, SyncProgressTracker},
	retry::{NETWORK_FAULT_DELAY, RetryConfig, is_network_transient, retry_with},
	types::{ChainInfo, FetchOutcome, IngestError, IngestOptions, IngestReport},
};
use crate::store::{BlockBundle, IndexStore, ScanProgress};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main ingestion pipeline.
pub struct IngestPipeline<C: LedgerApi, S: IndexStore + ?Sized> {
	client: Arc<C>,
	store: Arc<S>,
	chain: ChainInfo,

	// Services
	normalizer: BlockNormalizer,
	dispatcher: ProgressDispatcher,

	// Configuration
	retry: RetryConfig,
	log_interval: u64,
}

impl<C: LedgerApi, S: IndexStore + ?Sized> IngestPipeline<C, S> {
	/// Create a pipeline retrying ledger calls at the network-fault delay.
	pub fn new(client: Arc<C>, store: Arc<S>, chain: ChainInfo) -> Self {
		Self {
			client,
			store,
			normalizer: BlockNormalizer::new(chain.chain_id.clone()),
			chain,
			dispatcher: ProgressDispatcher::new(),
			retry: RetryConfig::network_fault(NETWORK_FAULT_DELAY),
			log_interval: DEFAULT_LOG_INTERVAL,
		}
	}

	/// Retry policy used around every ledger call.
	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	/// Heights between two periodic progress log lines.
	pub fn with_log_interval(mut self, log_interval: u64) -> Self {
		self.log_interval = log_interval;
		self
	}

	/// Register a progress sink, called after every indexed or skipped height.
	pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
		self.dispatcher.register(Box::new(sink));
		self
	}

	/// Run the pipeline over the range resolved from `options`.
	///
	/// On failure the error is returned as [`IngestError::Aborted`] carrying the failed height,
	/// after the progress record was pinned at the last confirmed height.
	pub async fn run(&self, options: &IngestOptions) -> Result<IngestReport, IngestError> {
		let chain_id = self.chain.chain_id.as_str();
		info!("Starting ingestion for {} ({})", chain_id, self.chain.chain_name);

		let prior = self.store.load_progress(chain_id).await?;

		let gaps = match detect_gaps(self.store.as_ref(), chain_id).await {
			Ok(gaps) => gaps,
			Err(e) => {
				warn!("Gap check for {} failed: {}", chain_id, e);
				Vec::new()
			}
		};

		let (start_height, end_height) = self.resolve_range(options, prior.as_ref()).await?;
		let mut tracker = SyncProgressTracker::new(
			self.chain.clone(),
			prior.as_ref(),
			start_height,
			end_height,
			self.log_interval,
		);

		if start_height > end_height {
			info!(
				"Nothing to ingest: start height {} is past end height {}",
				start_height, end_height
			);
			return Ok(tracker.report(gaps));
		}

		info!(
			"Ingesting blocks {} to {} with {} concurrent fetches",
			start_height,
			end_height,
			options.effective_concurrency()
		);

		let mut queue = FetchQueue::new(
			Arc::clone(&self.client),
			self.retry.clone(),
			start_height,
			end_height,
			options.effective_concurrency(),
		);

		while let Some((height, fetched)) = queue.next().await {
			let handled = match fetched {
				Ok(outcome) => {
					self.handle_height(height, outcome, &mut tracker, queue.in_flight())
						.await
				}
				Err(e) => Err(e),
			};

			if let Err(e) = handled {
				return Err(self.abort(height, e, &tracker).await);
			}
			tracker.log_progress(false);
		}

		tracker.log_progress(true);
		let report = tracker.report(gaps);
		info!("{}", report.summary());
		Ok(report)
	}

	/// Start: explicit start, else the chain tip with `from_latest`, else right after the stored
	/// progress, else genesis. End: explicit end, else the chain tip. The tip is read at most
	/// once.
	async fn resolve_range(
		&self,
		options: &IngestOptions,
		prior: Option<&ScanProgress>,
	) -> Result<(u64, u64), IngestError> {
		let needs_tip = options.end.is_none() || (options.start.is_none() && options.from_latest);
		let tip = if needs_tip {
			retry_with(
				&self.retry,
				"Reading chain height",
				is_network_transient,
				|| self.client.chain_height(),
			)
			.await?
		} else {
			0
		};

		let start_height = match (options.start, options.from_latest, prior) {
			(Some(start), _, _) => start,
			(None, true, _) => tip,
			(None, false, Some(progress)) => {
				debug!(
					"Resuming {} after block {:?}",
					progress.chain_id, progress.last_indexed_block
				);
				progress.resume_height()
			}
			(None, false, None) => 0,
		};
		let end_height = options.end.unwrap_or(tip);

		Ok((start_height, end_height))
	}

	async fn handle_height(
		&self,
		height: u64,
		outcome: FetchOutcome,
		tracker: &mut SyncProgressTracker,
		in_flight: usize,
	) -> Result<(), IngestError> {
		let skipped = match outcome {
			FetchOutcome::Pruned { height, reason } => {
				debug!("Block {} skipped: {}", height, reason);
				self.store
					.upsert_progress(&tracker.skip_checkpoint(height))
					.await?;
				tracker.record_skipped(height);
				true
			}
			FetchOutcome::Fetched(raw) => {
				let bundle = self.normalizer.normalize(height, raw)?;
				self.persist(&bundle).await?;

				let transactions = bundle.transactions.len() as u64;
				let events = bundle.events.len() as u64;
				self.store
					.upsert_progress(&tracker.checkpoint_for(height, transactions, events))
					.await?;
				tracker.record_block(height, transactions, events);
				false
			}
		};

		let (blocks_indexed, transactions_indexed, events_indexed) = tracker.totals();
		self.dispatcher
			.dispatch(&ProgressUpdate {
				chain_id: self.chain.chain_id.clone(),
				height,
				skipped,
				last_indexed_block: tracker.last_indexed_block(),
				blocks_indexed,
				transactions_indexed,
				events_indexed,
				in_flight,
			})
			.await;

		Ok(())
	}

	/// Write the block, transactions and events of one height.
	async fn persist(&self, bundle: &BlockBundle) -> Result<(), IngestError> {
		let height = bundle.block.height;

		if !self.store.insert_block(&bundle.block).await? {
			debug!("Block {} was already persisted", height);
		}

		let transactions = self.store.insert_transactions(&bundle.transactions).await?;
		let events = self.store.insert_events(&bundle.events).await?;
		if transactions < bundle.transactions.len() as u64 || events < bundle.events.len() as u64 {
			debug!(
				"Block {}: {}/{} transactions and {}/{} events were new",
				height,
				transactions,
				bundle.transactions.len(),
				events,
				bundle.events.len()
			);
		}

		Ok(())
	}

	/// Pin the progress record at the last confirmed height and wrap the error.
	async fn abort(
		&self,
		height: u64,
		err: IngestError,
		tracker: &SyncProgressTracker,
	) -> IngestError {
		error!("Ingestion of {} failed at block {}: {}", self.chain.chain_id, height, err);

		let checkpoint = tracker.failure_checkpoint();
		if let Err(e) = self.store.upsert_progress(&checkpoint).await {
			error!("Failed to pin progress at {:?}: {}", checkpoint.last_indexed_block, e);
		}

		IngestError::Aborted {
			height,
			source: Box::new(err),
		}
	}
}
