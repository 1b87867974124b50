//! Ordered, bounded-concurrency block fetching.
//!
//! [`FetchQueue`] keeps up to `window` fetches in flight, issued in ascending height order, and
//! hands results back strictly in that order: the head of the window is always awaited first,
//! whatever order the fetches actually complete in.

use crate::chain::{ChainError, LedgerApi, RawBlock};
use crate::ingest::retry::{RetryConfig, is_network_transient, is_pruned_state, retry_with};
use crate::ingest::types::{FetchOutcome, IngestError};

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, warn};

/// Fetch everything stored for `height`: header and body, then timestamp and events from the
/// block's state, the two reads running concurrently with the body.
pub async fn fetch_block<C>(client: &C, height: u64) -> Result<RawBlock, ChainError>
where
	C: LedgerApi + ?Sized,
{
	let hash = client.block_hash(height).await?;

	let (body, (timestamp, events)) = tokio::try_join!(client.block_body(height, hash), async {
		tokio::try_join!(client.timestamp_at(hash), client.events_at(hash))
	})?;

	Ok(RawBlock {
		body,
		events,
		timestamp,
	})
}

/// Fetch `height`, retrying network failures per `retry`.
///
/// A pruned-state error yields [`FetchOutcome::Pruned`] instead of an error.
pub async fn fetch_with_retry<C>(
	client: &C,
	height: u64,
	retry: &RetryConfig,
) -> Result<FetchOutcome, ChainError>
where
	C: LedgerApi + ?Sized,
{
	let label = format!("Fetching block {}", height);
	match retry_with(retry, &label, is_network_transient, || {
		fetch_block(client, height)
	})
	.await
	{
		Ok(block) => Ok(FetchOutcome::Fetched(block)),
		Err(e) if is_pruned_state(&e) => {
			warn!("Skipping block {}, state is pruned: {}", height, e);
			Ok(FetchOutcome::Pruned {
				height,
				reason: e.to_string(),
			})
		}
		Err(e) => Err(e),
	}
}

type FetchTask = JoinHandle<Result<FetchOutcome, ChainError>>;

/// Window of concurrent fetches over `start..=end`.
///
/// Dropping the queue aborts the fetches still in flight.
pub struct FetchQueue<C: LedgerApi> {
	client: Arc<C>,
	retry: RetryConfig,
	window: usize,
	next_height: Option<u64>,
	end_height: u64,
	in_flight: VecDeque<(u64, FetchTask)>,
}

impl<C: LedgerApi> FetchQueue<C> {
	pub fn new(
		client: Arc<C>,
		retry: RetryConfig,
		start_height: u64,
		end_height: u64,
		window: usize,
	) -> Self {
		Self {
			client,
			retry,
			window: window.max(1),
			next_height: (start_height <= end_height).then_some(start_height),
			end_height,
			in_flight: VecDeque::with_capacity(window.max(1)),
		}
	}

	/// Number of fetches issued and not yet handed out.
	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	/// The next height in ascending order with its fetch result, `None` once the range is drained.
	pub async fn next(&mut self) -> Option<(u64, Result<FetchOutcome, IngestError>)> {
		self.fill();
		let (height, task) = self.in_flight.pop_front()?;

		let result = match task.await {
			Ok(outcome) => outcome.map_err(IngestError::from),
			Err(e) => Err(IngestError::Task {
				height,
				reason: e.to_string(),
			}),
		};

		self.fill();
		Some((height, result))
	}

	fn fill(&mut self) {
		while self.in_flight.len() < self.window {
			let Some(height) = self.next_height else {
				break;
			};
			self.next_height = (height < self.end_height).then(|| height + 1);
			self.spawn(height);
		}
	}

	fn spawn(&mut self, height: u64) {
		debug!("Queueing fetch of block {}", height);
		let client = Arc::clone(&self.client);
		let retry = self.retry.clone();

		let task = tokio::spawn(
			async move { fetch_with_retry(client.as_ref(), height, &retry).await }
				.instrument(debug_span!("fetch", height)),
		);
		self.in_flight.push_back((height, task));
	}
}

impl<C: LedgerApi> Drop for FetchQueue<C> {
	fn drop(&mut self) {
		for (_, task) in &self.in_flight {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ingest::testing::MockLedger;
	use std::time::Duration;

	fn retry() -> RetryConfig {
		RetryConfig::network_fault(Duration::from_secs(30))
	}

	async fn drain(queue: &mut FetchQueue<MockLedger>) -> Vec<u64> {
		let mut heights = Vec::new();
		while let Some((height, result)) = queue.next().await {
			assert!(result.is_ok());
			heights.push(height);
		}
		heights
	}

	#[tokio::test(start_paused = true)]
	async fn results_come_back_in_height_order() {
		// later heights finish first
		let mut ledger = MockLedger::new(7);
		for height in 0..=7 {
			ledger = ledger.with_delay(height, Duration::from_millis(100 * (8 - height)));
		}
		let ledger = Arc::new(ledger);

		let mut queue = FetchQueue::new(ledger.clone(), retry(), 0, 7, 3);
		assert_eq!(drain(&mut queue).await, (0..=7).collect::<Vec<_>>());
		assert!(ledger.max_concurrent() <= 3);
		assert!(ledger.max_concurrent() > 1);
	}

	#[tokio::test(start_paused = true)]
	async fn the_window_never_exceeds_its_size() {
		let ledger = Arc::new(MockLedger::new(20).with_default_delay(Duration::from_millis(50)));
		let mut queue = FetchQueue::new(ledger.clone(), retry(), 5, 20, 4);

		let (height, _) = queue.next().await.unwrap();
		assert_eq!(height, 5);
		assert_eq!(queue.in_flight(), 4);

		drain(&mut queue).await;
		assert_eq!(ledger.max_concurrent(), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn empty_range_issues_no_fetches() {
		let ledger = Arc::new(MockLedger::new(200));
		let mut queue = FetchQueue::new(ledger.clone(), retry(), 100, 50, 5);

		assert!(queue.next().await.is_none());
		assert_eq!(ledger.total_fetches(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn pruned_heights_become_skips_and_failures_propagate() {
		let ledger = Arc::new(MockLedger::new(3).with_pruned(1).with_fatal(2));
		let mut queue = FetchQueue::new(ledger, retry(), 0, 3, 2);

		assert!(matches!(
			queue.next().await,
			Some((0, Ok(FetchOutcome::Fetched(_))))
		));
		assert!(matches!(
			queue.next().await,
			Some((1, Ok(FetchOutcome::Pruned { height: 1, .. })))
		));
		assert!(matches!(
			queue.next().await,
			Some((2, Err(IngestError::Chain(ChainError::Decode(_)))))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn transient_failures_are_retried() {
		let ledger = Arc::new(MockLedger::new(0).with_transient_failures(0, 2));
		let outcome = fetch_with_retry(ledger.as_ref(), 0, &retry()).await.unwrap();

		assert!(matches!(outcome, FetchOutcome::Fetched(ref block) if block.height() == 0));
		assert_eq!(ledger.fetch_attempts(0), 3);
	}
}
