//! Scripted ledger for pipeline tests.

use crate::chain::{
	ChainError, EventPhase, ExtrinsicArgs, LedgerApi, RawBlockBody, RawEvent, RawExtrinsic,
};

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const BASE_TIMESTAMP: u64 = 1_700_000_000_000;

/// Every block carries two extrinsics (an unsigned `Timestamp.set` and a signed
/// `Balances.transfer_keep_alive`) and three events (one outcome event per extrinsic plus a
/// finalization deposit). The block hash is the height.
#[derive(Default)]
pub struct MockLedger {
	tip: u64,
	pruned: HashSet<u64>,
	fatal: HashSet<u64>,
	failed_transfers: HashSet<u64>,
	undecodable: HashSet<u64>,
	delays: HashMap<u64, Duration>,
	default_delay: Option<Duration>,
	transient_failures: Mutex<HashMap<u64, u32>>,
	attempts: Mutex<HashMap<u64, u32>>,
	active: AtomicUsize,
	max_active: AtomicUsize,
}

impl MockLedger {
	pub fn new(tip: u64) -> Self {
		Self {
			tip,
			..Default::default()
		}
	}

	/// The state of `height` is pruned.
	pub fn with_pruned(mut self, height: u64) -> Self {
		self.pruned.insert(height);
		self
	}

	/// The body of `height` fails to decode.
	pub fn with_fatal(mut self, height: u64) -> Self {
		self.fatal.insert(height);
		self
	}

	/// The transfer in `height` fails with `Balances.InsufficientBalance`.
	pub fn with_failed_transfer(mut self, height: u64) -> Self {
		self.failed_transfers.insert(height);
		self
	}

	/// The transfer arguments in `height` cannot be decoded.
	pub fn with_undecodable_args(mut self, height: u64) -> Self {
		self.undecodable.insert(height);
		self
	}

	pub fn with_delay(mut self, height: u64, delay: Duration) -> Self {
		self.delays.insert(height, delay);
		self
	}

	pub fn with_default_delay(mut self, delay: Duration) -> Self {
		self.default_delay = Some(delay);
		self
	}

	/// The first `failures` hash lookups of `height` fail with a connection reset.
	pub fn with_transient_failures(self, height: u64, failures: u32) -> Self {
		if let Ok(mut pending) = self.transient_failures.lock() {
			pending.insert(height, failures);
		}
		self
	}

	/// Hash lookups made for `height`.
	pub fn fetch_attempts(&self, height: u64) -> u32 {
		self.attempts
			.lock()
			.unwrap()
			.get(&height)
			.copied()
			.unwrap_or_default()
	}

	pub fn total_fetches(&self) -> u32 {
		self.attempts.lock().unwrap().values().sum()
	}

	/// Highest number of block bodies fetched at the same time.
	pub fn max_concurrent(&self) -> usize {
		self.max_active.load(Ordering::SeqCst)
	}

	fn extrinsics(&self, height: u64) -> Vec<RawExtrinsic> {
		let transfer_args = if self.undecodable.contains(&height) {
			ExtrinsicArgs::Undecodable("unexpected end of input".to_string())
		} else {
			ExtrinsicArgs::Decoded(vec![
				("dest".to_string(), json!("5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty")),
				("value".to_string(), json!(height * 1_000)),
			])
		};

		vec![
			RawExtrinsic {
				index: 0,
				hash: format!("0x{height:04x}00"),
				pallet: "Timestamp".to_string(),
				call: "set".to_string(),
				args: ExtrinsicArgs::Decoded(vec![(
					"now".to_string(),
					json!(BASE_TIMESTAMP + height * 6_000),
				)]),
				signer: None,
				nonce: None,
				tip: None,
				signed: false,
			},
			RawExtrinsic {
				index: 1,
				hash: format!("0x{height:04x}01"),
				pallet: "Balances".to_string(),
				call: "transfer_keep_alive".to_string(),
				args: transfer_args,
				signer: Some("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY".to_string()),
				nonce: Some(height),
				tip: Some(0),
				signed: true,
			},
		]
	}

	fn events(&self, height: u64) -> Vec<RawEvent> {
		let system = |index: u32, phase: EventPhase, variant: &str| RawEvent {
			index,
			phase,
			pallet: "System".to_string(),
			variant: variant.to_string(),
			data: Vec::new(),
			topics: Vec::new(),
			dispatch_error: None,
		};

		let transfer_outcome = if self.failed_transfers.contains(&height) {
			RawEvent {
				data: vec![json!({ "Module": { "index": 5, "error": "0x02000000" } })],
				dispatch_error: Some("Balances.InsufficientBalance".to_string()),
				..system(1, EventPhase::ApplyExtrinsic(1), "ExtrinsicFailed")
			}
		} else {
			system(1, EventPhase::ApplyExtrinsic(1), "ExtrinsicSuccess")
		};

		vec![
			system(0, EventPhase::ApplyExtrinsic(0), "ExtrinsicSuccess"),
			transfer_outcome,
			RawEvent {
				pallet: "Treasury".to_string(),
				data: vec![json!(height)],
				..system(2, EventPhase::Finalization, "Deposit")
			},
		]
	}
}

#[async_trait::async_trait]
impl LedgerApi for MockLedger {
	type Hash = u64;

	async fn chain_height(&self) -> Result<u64, ChainError> {
		Ok(self.tip)
	}

	async fn block_hash(&self, height: u64) -> Result<u64, ChainError> {
		*self.attempts.lock().unwrap().entry(height).or_default() += 1;

		if let Some(remaining) = self.transient_failures.lock().unwrap().get_mut(&height) {
			if *remaining > 0 {
				*remaining -= 1;
				return Err(ChainError::Transport("connection reset by peer".to_string()));
			}
		}
		if height > self.tip {
			return Err(ChainError::UnknownBlock(height));
		}
		Ok(height)
	}

	async fn block_body(&self, height: u64, hash: u64) -> Result<RawBlockBody, ChainError> {
		let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_active.fetch_max(active, Ordering::SeqCst);

		let delay = self.delays.get(&height).copied().or(self.default_delay);
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.active.fetch_sub(1, Ordering::SeqCst);

		if self.fatal.contains(&height) {
			return Err(ChainError::Decode(format!(
				"failed to decode extrinsics of block {}",
				height
			)));
		}

		Ok(RawBlockBody {
			height,
			hash: format!("0x{hash:064x}"),
			parent_hash: format!("0x{:064x}", hash.saturating_sub(1)),
			state_root: format!("0x{:064x}", hash + 1_000_000),
			extrinsics_root: format!("0x{:064x}", hash + 2_000_000),
			extrinsics: self.extrinsics(height),
		})
	}

	async fn events_at(&self, hash: u64) -> Result<Vec<RawEvent>, ChainError> {
		if self.pruned.contains(&hash) {
			return Err(ChainError::Rpc(format!(
				"State already discarded for 0x{hash:064x}"
			)));
		}
		Ok(self.events(hash))
	}

	async fn timestamp_at(&self, hash: u64) -> Result<u64, ChainError> {
		Ok(BASE_TIMESTAMP + hash * 6_000)
	}
}
