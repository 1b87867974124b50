use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized block, one per height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRecord {
	pub height: u64,
	pub hash: String,
	pub parent_hash: String,
	pub state_root: String,
	pub extrinsics_root: String,
	/// Milliseconds since the epoch, from the block's `Timestamp::Now`.
	pub timestamp: u64,
	pub extrinsic_count: u32,
	pub event_count: u32,
	/// Block author. Not extracted yet: author decoding is consensus specific, always `None`.
	pub author: Option<String>,
	pub chain_id: String,
	#[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
	pub indexed_at: DateTime<Utc>,
}

impl BlockRecord {
	/// Whether `other` claims this block's height or hash with a different block.
	pub fn conflicts_with(&self, other: &BlockRecord) -> bool {
		self.height != other.height || self.hash != other.hash || self.chain_id != other.chain_id
	}
}

/// A normalized extrinsic, unique on `(block_height, index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub block_height: u64,
	pub index: u32,
	pub hash: String,
	pub pallet: String,
	pub method: String,
	/// Decoded arguments by name. Empty when the arguments could not be decoded.
	pub args: serde_json::Map<String, serde_json::Value>,
	pub signer: Option<String>,
	pub success: bool,
	pub error: Option<String>,
	pub timestamp: u64,
	pub nonce: Option<u64>,
	/// Decimal string, tips do not fit a 64 bit document integer.
	pub tip: Option<String>,
	pub signed: bool,
	pub chain_id: String,
	#[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
	pub indexed_at: DateTime<Utc>,
}

/// A normalized event, unique on `(block_height, index)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub block_height: u64,
	pub index: u32,
	/// Index of the extrinsic that triggered the event, apply-phase events only.
	pub extrinsic_index: Option<u32>,
	pub pallet: String,
	pub method: String,
	pub data: Vec<serde_json::Value>,
	/// One of `Initialization`, `ApplyExtrinsic`, `Finalization`.
	pub phase: String,
	pub topics: Vec<String>,
	pub timestamp: u64,
	pub chain_id: String,
	#[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
	pub indexed_at: DateTime<Utc>,
}

/// Durable resume checkpoint, one per chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
	pub chain_id: String,
	pub chain_name: String,
	/// Highest height whose block, transactions and events are all persisted.
	/// `None` until the first height is confirmed.
	pub last_indexed_block: Option<u64>,
	pub total_blocks: u64,
	pub total_transactions: u64,
	pub total_events: u64,
	#[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
	pub updated_at: DateTime<Utc>,
	pub is_complete: bool,
	pub target_end_block: Option<u64>,
}

impl ScanProgress {
	/// The height a forward run resumes from.
	pub fn resume_height(&self) -> u64 {
		self.last_indexed_block.map_or(0, |height| height + 1)
	}
}

/// Records produced for one height.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBundle {
	pub block: BlockRecord,
	pub transactions: Vec<TransactionRecord>,
	pub events: Vec<EventRecord>,
}

/// Error types for persistent store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("MongoDB error: {0}")]
	Mongo(#[from] mongodb::error::Error),

	#[error("BSON serialization error: {0}")]
	Serialize(#[from] bson::ser::Error),

	#[error("BSON deserialization error: {0}")]
	Deserialize(#[from] bson::de::Error),

	#[error("Invalid record: {0}")]
	InvalidRecord(String),

	#[error("Store unavailable: {0}")]
	Unavailable(String),
}
