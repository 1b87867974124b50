use crate::store::types::*;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Persistent store for indexed chain data.
///
/// Inserts are governed by the uniqueness constraints of each collection: blocks on height and
/// on hash, transactions and events on `(block_height, index)`, progress on chain id. A record
/// that conflicts with an existing one is rejected and the existing record is kept; the insert
/// methods report how many records were actually written.
#[async_trait::async_trait]
pub trait IndexStore: Send + Sync {
	/// Create the collections' unique and lookup indexes. Idempotent.
	async fn ensure_indexes(&self) -> Result<(), StoreError>;

	/// Insert a block. Returns `false` if it was rejected as a duplicate.
	async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError>;

	/// Bulk insert transactions. Returns the number inserted.
	async fn insert_transactions(
		&self,
		transactions: &[TransactionRecord],
	) -> Result<u64, StoreError>;

	/// Bulk insert events. Returns the number inserted.
	async fn insert_events(&self, events: &[EventRecord]) -> Result<u64, StoreError>;

	/// Insert or replace the progress record of `progress.chain_id`.
	async fn upsert_progress(&self, progress: &ScanProgress) -> Result<(), StoreError>;

	async fn load_progress(&self, chain_id: &str) -> Result<Option<ScanProgress>, StoreError>;

	/// All persisted block heights of a chain, ascending.
	async fn block_heights(&self, chain_id: &str) -> Result<Vec<u64>, StoreError>;
}

/// A write call received by [`MemoryStore`], tagged with the height it concerns.
///
/// Batches carry the height of their first record, `None` when empty. Progress carries the
/// checkpoint's `last_indexed_block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWrite {
	Block(u64),
	Transactions(Option<u64>),
	Events(Option<u64>),
	Progress(Option<u64>),
}

#[derive(Default)]
struct MemoryCollections {
	blocks: BTreeMap<u64, BlockRecord>,
	/// Block hash to height.
	block_hashes: HashMap<String, u64>,
	transactions: BTreeMap<(u64, u32), TransactionRecord>,
	events: BTreeMap<(u64, u32), EventRecord>,
	progress: HashMap<String, ScanProgress>,
	/// Heights in the order their blocks were inserted.
	block_insert_order: Vec<u64>,
	/// Every write call in arrival order, including rejected ones.
	write_log: Vec<StoreWrite>,
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
	data: Mutex<MemoryCollections>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryCollections>, StoreError> {
		self.data
			.lock()
			.map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
	}

	/// Heights in the order their blocks were inserted.
	pub fn block_insert_order(&self) -> Vec<u64> {
		self.lock()
			.map(|data| data.block_insert_order.clone())
			.unwrap_or_default()
	}

	/// Number of write calls received, including rejected ones.
	pub fn write_count(&self) -> usize {
		self.lock().map(|data| data.write_log.len()).unwrap_or_default()
	}

	/// Every write call received so far, in order.
	pub fn write_log(&self) -> Vec<StoreWrite> {
		self.lock()
			.map(|data| data.write_log.clone())
			.unwrap_or_default()
	}

	pub fn block(&self, height: u64) -> Option<BlockRecord> {
		self.lock().ok()?.blocks.get(&height).cloned()
	}

	pub fn transactions_at(&self, height: u64) -> Vec<TransactionRecord> {
		self.lock()
			.map(|data| {
				data.transactions
					.range((height, 0)..=(height, u32::MAX))
					.map(|(_, tx)| tx.clone())
					.collect()
			})
			.unwrap_or_default()
	}

	pub fn events_at(&self, height: u64) -> Vec<EventRecord> {
		self.lock()
			.map(|data| {
				data.events
					.range((height, 0)..=(height, u32::MAX))
					.map(|(_, event)| event.clone())
					.collect()
			})
			.unwrap_or_default()
	}
}

#[async_trait::async_trait]
impl IndexStore for MemoryStore {
	async fn ensure_indexes(&self) -> Result<(), StoreError> {
		Ok(())
	}

	async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
		let mut data = self.lock()?;
		data.write_log.push(StoreWrite::Block(block.height));

		let existing = data.blocks.get(&block.height).or_else(|| {
			data.block_hashes
				.get(&block.hash)
				.and_then(|height| data.blocks.get(height))
		});
		if let Some(existing) = existing {
			if existing.conflicts_with(block) {
				warn!(
					"Rejected block {} ({}, chain {}): conflicts with stored block {} ({}, chain {})",
					block.height,
					block.hash,
					block.chain_id,
					existing.height,
					existing.hash,
					existing.chain_id
				);
			} else {
				debug!("Rejected duplicate block {} ({})", block.height, block.hash);
			}
			return Ok(false);
		}

		data.block_hashes.insert(block.hash.clone(), block.height);
		data.blocks.insert(block.height, block.clone());
		data.block_insert_order.push(block.height);
		Ok(true)
	}

	async fn insert_transactions(
		&self,
		transactions: &[TransactionRecord],
	) -> Result<u64, StoreError> {
		let mut data = self.lock()?;
		data.write_log.push(StoreWrite::Transactions(
			transactions.first().map(|tx| tx.block_height),
		));

		let mut inserted = 0;
		for tx in transactions {
			let key = (tx.block_height, tx.index);
			if data.transactions.contains_key(&key) {
				debug!("Rejected duplicate transaction {:?}", key);
				continue;
			}
			data.transactions.insert(key, tx.clone());
			inserted += 1;
		}
		Ok(inserted)
	}

	async fn insert_events(&self, events: &[EventRecord]) -> Result<u64, StoreError> {
		let mut data = self.lock()?;
		data.write_log.push(StoreWrite::Events(
			events.first().map(|event| event.block_height),
		));

		let mut inserted = 0;
		for event in events {
			let key = (event.block_height, event.index);
			if data.events.contains_key(&key) {
				debug!("Rejected duplicate event {:?}", key);
				continue;
			}
			data.events.insert(key, event.clone());
			inserted += 1;
		}
		Ok(inserted)
	}

	async fn upsert_progress(&self, progress: &ScanProgress) -> Result<(), StoreError> {
		let mut data = self.lock()?;
		data.write_log
			.push(StoreWrite::Progress(progress.last_indexed_block));
		data.progress
			.insert(progress.chain_id.clone(), progress.clone());
		Ok(())
	}

	async fn load_progress(&self, chain_id: &str) -> Result<Option<ScanProgress>, StoreError> {
		Ok(self.lock()?.progress.get(chain_id).cloned())
	}

	async fn block_heights(&self, chain_id: &str) -> Result<Vec<u64>, StoreError> {
		Ok(self
			.lock()?
			.blocks
			.values()
			.filter(|block| block.chain_id == chain_id)
			.map(|block| block.height)
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;

	fn block(height: u64, hash: &str) -> BlockRecord {
		BlockRecord {
			height,
			hash: hash.to_string(),
			parent_hash: "0x00".to_string(),
			state_root: "0x00".to_string(),
			extrinsics_root: "0x00".to_string(),
			timestamp: 1_000 * height,
			extrinsic_count: 0,
			event_count: 0,
			author: None,
			chain_id: "test".to_string(),
			indexed_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn duplicate_blocks_are_rejected_and_the_original_kept() {
		let store = MemoryStore::new();

		assert!(store.insert_block(&block(1, "0xaa")).await.unwrap());
		// same height, different hash
		assert!(!store.insert_block(&block(1, "0xbb")).await.unwrap());
		// same hash, different height
		assert!(!store.insert_block(&block(2, "0xaa")).await.unwrap());

		assert_eq!(store.block(1).unwrap().hash, "0xaa");
		assert!(store.block(2).is_none());
		assert_eq!(store.block_insert_order(), vec![1]);
	}

	#[tokio::test]
	async fn blocks_from_another_chain_do_not_replace_stored_ones() {
		let store = MemoryStore::new();
		let original = block(4, "0xaa");
		assert!(store.insert_block(&original).await.unwrap());

		// identical re-run
		assert!(!store.insert_block(&original).await.unwrap());
		assert!(!original.conflicts_with(&block(4, "0xaa")));

		let mut foreign = block(4, "0xaa");
		foreign.chain_id = "other".to_string();
		assert!(original.conflicts_with(&foreign));
		assert!(!store.insert_block(&foreign).await.unwrap());

		assert_eq!(store.block(4).unwrap().chain_id, "test");
		assert!(store.block_heights("other").await.unwrap().is_empty());
		assert_eq!(store.write_log(), vec![StoreWrite::Block(4); 3]);
	}

	#[tokio::test]
	async fn heights_are_listed_ascending_per_chain() {
		let store = MemoryStore::new();
		for height in [5, 1, 3] {
			store
				.insert_block(&block(height, &format!("0x{height}")))
				.await
				.unwrap();
		}
		let mut other = block(9, "0x09");
		other.chain_id = "other".to_string();
		store.insert_block(&other).await.unwrap();

		assert_eq!(store.block_heights("test").await.unwrap(), vec![1, 3, 5]);
		assert_eq!(store.block_heights("other").await.unwrap(), vec![9]);
	}

	#[tokio::test]
	async fn progress_upsert_replaces_the_chain_record() {
		let store = MemoryStore::new();
		assert!(store.load_progress("test").await.unwrap().is_none());

		let mut progress = ScanProgress {
			chain_id: "test".to_string(),
			chain_name: "Test".to_string(),
			last_indexed_block: Some(3),
			total_blocks: 4,
			total_transactions: 0,
			total_events: 0,
			updated_at: Utc::now(),
			is_complete: false,
			target_end_block: Some(10),
		};
		store.upsert_progress(&progress).await.unwrap();
		progress.last_indexed_block = Some(4);
		store.upsert_progress(&progress).await.unwrap();

		let loaded = store.load_progress("test").await.unwrap().unwrap();
		assert_eq!(loaded.last_indexed_block, Some(4));
		assert_eq!(loaded.resume_height(), 5);
	}
}
