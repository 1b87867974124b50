//! Retry policy for remote calls.
//!
//! Errors fall in exactly one of three classes: network-transient (retried), pruned-state
//! (never retried, the caller skips the height) and fatal (propagated). Retrying is driven by the
//! `backoff` crate; [`RetryConfig`] describes either the general exponential backoff or the fixed
//! delay used around remote ledger calls.

use crate::chain::ChainError;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default fixed delay between attempts when the remote ledger is unreachable.
pub const NETWORK_FAULT_DELAY: Duration = Duration::from_secs(30);

/// Message fragments of errors raised when the node no longer holds the requested state.
const PRUNED_SIGNATURES: &[&str] = &[
	"state already discarded",
	"state discarded",
	"state pruned",
	"unknown block",
	"header was pruned",
];

/// Message fragments of transport level failures.
const TRANSIENT_SIGNATURES: &[&str] = &[
	"timeout",
	"timed out",
	"econnrefused",
	"connection refused",
	"econnreset",
	"connection reset",
	"enotfound",
	"dns error",
	"failed to lookup address",
	"disconnected",
	"connection closed",
	"background task closed",
	"restart required",
	"broken pipe",
	"no response",
];

/// The remote node no longer holds historical state for the requested height.
pub fn is_pruned_state(err: &ChainError) -> bool {
	let message = err.to_string().to_lowercase();
	PRUNED_SIGNATURES
		.iter()
		.any(|signature| message.contains(signature))
}

/// A network failure worth retrying. Never true for a pruned-state error.
pub fn is_network_transient(err: &ChainError) -> bool {
	if is_pruned_state(err) {
		return false;
	}
	if matches!(err, ChainError::Transport(_)) {
		return true;
	}

	let message = err.to_string().to_lowercase();
	TRANSIENT_SIGNATURES
		.iter()
		.any(|signature| message.contains(signature))
}

/// Backoff parameters.
///
/// The delay sequence is `d0, min(d0 * m, D), min(d0 * m^2, D), ...` without jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
	pub initial_delay: Duration,
	pub multiplier: f64,
	pub max_delay: Duration,
	/// `None` retries forever.
	pub max_retries: Option<u32>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			initial_delay: Duration::from_secs(1),
			multiplier: 2.0,
			max_delay: Duration::from_secs(60),
			max_retries: None,
		}
	}
}

impl RetryConfig {
	/// Fixed delay, unlimited attempts. Used around remote ledger calls.
	pub fn network_fault(delay: Duration) -> Self {
		Self {
			initial_delay: delay,
			multiplier: 1.0,
			max_delay: delay,
			max_retries: None,
		}
	}

	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = Some(max_retries);
		self
	}

	pub fn backoff(&self) -> RetryBackoff {
		let inner = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_delay)
			.with_multiplier(self.multiplier)
			.with_max_interval(self.max_delay)
			.with_randomization_factor(0.0)
			.with_max_elapsed_time(None)
			.build();

		RetryBackoff {
			inner,
			max_retries: self.max_retries,
			retries: 0,
		}
	}
}

/// Exponential backoff with an optional cap on the number of retries.
#[derive(Debug)]
pub struct RetryBackoff {
	inner: ExponentialBackoff,
	max_retries: Option<u32>,
	retries: u32,
}

impl Backoff for RetryBackoff {
	fn next_backoff(&mut self) -> Option<Duration> {
		if self.max_retries.is_some_and(|max| self.retries >= max) {
			return None;
		}
		self.retries += 1;
		self.inner.next_backoff()
	}

	fn reset(&mut self) {
		self.retries = 0;
		self.inner.reset();
	}
}

/// Run `operation`, retrying errors for which `is_retryable` holds.
///
/// Errors that are not retryable, and the last error once retries are exhausted, are returned
/// as-is.
pub async fn retry_with<T, E, Op, Fut, C>(
	config: &RetryConfig,
	label: &str,
	is_retryable: C,
	mut operation: Op,
) -> Result<T, E>
where
	Op: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	C: Fn(&E) -> bool,
	E: Display,
{
	let is_retryable = &is_retryable;
	backoff::future::retry_notify(
		config.backoff(),
		|| {
			let attempt = operation();
			async move {
				attempt.await.map_err(|e| {
					if is_retryable(&e) {
						backoff::Error::transient(e)
					} else {
						backoff::Error::permanent(e)
					}
				})
			}
		},
		|e: E, delay: Duration| {
			warn!("{} failed: {}. Retrying in {:?}", label, e, delay);
		},
	)
	.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[test]
	fn general_backoff_grows_to_the_cap() {
		let config = RetryConfig {
			initial_delay: Duration::from_secs(1),
			multiplier: 2.0,
			max_delay: Duration::from_secs(5),
			max_retries: None,
		};
		let mut backoff = config.backoff();

		let delays: Vec<u64> = (0..5)
			.map(|_| backoff.next_backoff().unwrap().as_secs())
			.collect();
		assert_eq!(delays, vec![1, 2, 4, 5, 5]);
	}

	#[test]
	fn network_fault_delay_is_fixed() {
		let mut backoff = RetryConfig::network_fault(Duration::from_secs(30)).backoff();
		for _ in 0..10 {
			assert_eq!(backoff.next_backoff().map(|d| d.as_secs()), Some(30));
		}
	}

	#[test]
	fn retries_stop_at_the_limit() {
		let mut backoff = RetryConfig::default().with_max_retries(2).backoff();
		assert!(backoff.next_backoff().is_some());
		assert!(backoff.next_backoff().is_some());
		assert!(backoff.next_backoff().is_none());

		backoff.reset();
		assert_eq!(backoff.next_backoff().map(|d| d.as_secs()), Some(1));
	}

	#[test]
	fn classifiers_are_disjoint() {
		let pruned = ChainError::Rpc(
			"State already discarded for 0x1234, connection reset by peer".to_string(),
		);
		assert!(is_pruned_state(&pruned));
		assert!(!is_network_transient(&pruned));

		let transient = ChainError::Transport("connection reset by peer".to_string());
		assert!(is_network_transient(&transient));
		assert!(!is_pruned_state(&transient));

		let timeout = ChainError::Rpc("Request timeout".to_string());
		assert!(is_network_transient(&timeout));

		let fatal = ChainError::Decode("unexpected end of input".to_string());
		assert!(!is_network_transient(&fatal));
		assert!(!is_pruned_state(&fatal));

		assert!(!is_pruned_state(&ChainError::UnknownBlock(7)));
		assert!(!is_network_transient(&ChainError::UnknownBlock(7)));
	}

	#[tokio::test(start_paused = true)]
	async fn transient_errors_are_retried_until_success() {
		let attempts = AtomicU32::new(0);
		let config = RetryConfig::network_fault(NETWORK_FAULT_DELAY);

		let result = retry_with(&config, "fetch", is_network_transient, || async {
			if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
				Err(ChainError::Transport("connection refused".to_string()))
			} else {
				Ok(42)
			}
		})
		.await;

		assert_eq!(result.unwrap(), 42);
		assert_eq!(attempts.load(Ordering::SeqCst), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn permanent_errors_are_not_retried() {
		let attempts = AtomicU32::new(0);
		let config = RetryConfig::network_fault(NETWORK_FAULT_DELAY);

		let result: Result<(), _> = retry_with(&config, "fetch", is_network_transient, || async {
			attempts.fetch_add(1, Ordering::SeqCst);
			Err(ChainError::Rpc("State already discarded for 0xabcd".to_string()))
		})
		.await;

		assert!(is_pruned_state(&result.unwrap_err()));
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn last_error_is_returned_once_retries_are_exhausted() {
		let attempts = AtomicU32::new(0);
		let config = RetryConfig::default().with_max_retries(2);

		let result: Result<(), _> = retry_with(&config, "connect", is_network_transient, || async {
			attempts.fetch_add(1, Ordering::SeqCst);
			Err(ChainError::Transport("timed out".to_string()))
		})
		.await;

		assert!(matches!(result, Err(ChainError::Transport(_))));
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
	}
}
