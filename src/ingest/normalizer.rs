use crate::chain::{ExtrinsicArgs, RawBlock, RawEvent, RawExtrinsic};
use crate::ingest::types::IngestError;
use crate::store::{BlockBundle, BlockRecord, EventRecord, TransactionRecord};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

const SYSTEM_PALLET: &str = "System";
const EXTRINSIC_SUCCESS: &str = "ExtrinsicSuccess";
const EXTRINSIC_FAILED: &str = "ExtrinsicFailed";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Converts fetched blocks into the records persisted for their height.
#[derive(Clone)]
pub struct BlockNormalizer {
	chain_id: String,
}

impl BlockNormalizer {
	pub fn new(chain_id: impl Into<String>) -> Self {
		Self {
			chain_id: chain_id.into(),
		}
	}

	/// Normalize the block fetched for `height`.
	///
	/// A failure to decode one extrinsic's arguments is contained to that extrinsic, it never fails
	/// the block.
	pub fn normalize(&self, height: u64, raw: RawBlock) -> Result<BlockBundle, IngestError> {
		if raw.height() != height {
			return Err(IngestError::Normalize {
				height,
				reason: format!("ledger returned block {} instead", raw.height()),
			});
		}

		let indexed_at = Utc::now();
		let RawBlock {
			body,
			events,
			timestamp,
		} = raw;

		let transactions: Vec<TransactionRecord> = body
			.extrinsics
			.into_iter()
			.map(|ext| self.transaction_record(height, ext, &events, timestamp, indexed_at))
			.collect();

		let event_records: Vec<EventRecord> = events
			.into_iter()
			.map(|event| self.event_record(height, event, timestamp, indexed_at))
			.collect();

		let block = BlockRecord {
			height,
			hash: body.hash,
			parent_hash: body.parent_hash,
			state_root: body.state_root,
			extrinsics_root: body.extrinsics_root,
			timestamp,
			extrinsic_count: transactions.len() as u32,
			event_count: event_records.len() as u32,
			author: None,
			chain_id: self.chain_id.clone(),
			indexed_at,
		};

		debug!(
			"Normalized block {}: {} transactions, {} events",
			height,
			transactions.len(),
			event_records.len()
		);

		Ok(BlockBundle {
			block,
			transactions,
			events: event_records,
		})
	}

	fn transaction_record(
		&self,
		height: u64,
		ext: RawExtrinsic,
		events: &[RawEvent],
		timestamp: u64,
		indexed_at: DateTime<Utc>,
	) -> TransactionRecord {
		let (success, error) = extrinsic_outcome(events, ext.index);

		let args = match ext.args {
			ExtrinsicArgs::Decoded(pairs) => pairs.into_iter().collect::<Map<String, Value>>(),
			ExtrinsicArgs::Undecodable(reason) => {
				warn!(
					"Failed to decode arguments of extrinsic {}-{} ({}.{}): {}",
					height, ext.index, ext.pallet, ext.call, reason
				);
				Map::new()
			}
		};

		TransactionRecord {
			block_height: height,
			index: ext.index,
			hash: ext.hash,
			pallet: ext.pallet,
			method: ext.call,
			args,
			signer: ext.signer,
			success,
			error,
			timestamp,
			nonce: ext.nonce.filter(|_| ext.signed),
			tip: ext.tip.filter(|_| ext.signed).map(|tip| tip.to_string()),
			signed: ext.signed,
			chain_id: self.chain_id.clone(),
			indexed_at,
		}
	}

	fn event_record(
		&self,
		height: u64,
		event: RawEvent,
		timestamp: u64,
		indexed_at: DateTime<Utc>,
	) -> EventRecord {
		EventRecord {
			block_height: height,
			index: event.index,
			extrinsic_index: event.phase.extrinsic_index(),
			pallet: event.pallet,
			method: event.variant,
			data: event.data,
			phase: event.phase.as_str().to_string(),
			topics: event.topics,
			timestamp,
			chain_id: self.chain_id.clone(),
			indexed_at,
		}
	}
}

/// Success flag and error of the extrinsic at `index`, from the system events of its apply phase.
///
/// An extrinsic without either marker event is recorded as unsuccessful with no error.
pub fn extrinsic_outcome(events: &[RawEvent], index: u32) -> (bool, Option<String>) {
	let marker = events.iter().find(|event| {
		event.phase.extrinsic_index() == Some(index)
			&& event.pallet == SYSTEM_PALLET
			&& (event.variant == EXTRINSIC_SUCCESS || event.variant == EXTRINSIC_FAILED)
	});

	match marker {
		Some(event) if event.variant == EXTRINSIC_SUCCESS => (true, None),
		Some(event) => (false, Some(failure_reason(event))),
		None => (false, None),
	}
}

fn failure_reason(event: &RawEvent) -> String {
	if let Some(resolved) = &event.dispatch_error {
		return resolved.clone();
	}

	match event.data.first() {
		Some(Value::String(message)) => message.clone(),
		Some(Value::Null) | None => UNKNOWN_ERROR.to_string(),
		Some(other) => other.to_string(),
	}
}
