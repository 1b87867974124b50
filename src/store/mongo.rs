//! MongoDB implementation of [`IndexStore`].
//!
//! Four collections are used: `blocks`, `transactions`, `events` and `scan_progress`. Unique
//! indexes enforce one record per height / per `(blockHeight, index)` / per chain, so that a
//! re-run over an already persisted range is rejected by the server instead of duplicating data.
//! Bulk inserts are unordered: a duplicate in the middle of a batch does not stop the rest.

use crate::store::repositories::IndexStore;
use crate::store::types::*;

use futures::TryStreamExt;
use mongodb::{
	Client, Collection, Database, IndexModel,
	bson::{Bson, Document, doc, to_bson},
	error::{Error as MongoError, ErrorKind, WriteFailure},
	options::{ClientOptions, FindOptions, IndexOptions, InsertManyOptions, ReplaceOptions},
};
use tracing::{debug, info, warn};

const BLOCKS: &str = "blocks";
const TRANSACTIONS: &str = "transactions";
const EVENTS: &str = "events";
const SCAN_PROGRESS: &str = "scan_progress";

/// Server error code for unique index violations.
const DUPLICATE_KEY: i32 = 11000;

/// Document store backed by MongoDB
#[derive(Clone)]
pub struct MongoStore {
	db: Database,
}

impl MongoStore {
	/// Connect to `uri` and use database `database`.
	pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
		let mut options = ClientOptions::parse(uri).await?;
		options.app_name = Some("substrate-ingest".to_string());
		let client = Client::with_options(options)?;

		info!("Connected to MongoDB, using database {}", database);
		Ok(Self {
			db: client.database(database),
		})
	}

	fn blocks(&self) -> Collection<BlockRecord> {
		self.db.collection(BLOCKS)
	}

	fn transactions(&self) -> Collection<TransactionRecord> {
		self.db.collection(TRANSACTIONS)
	}

	fn events(&self) -> Collection<EventRecord> {
		self.db.collection(EVENTS)
	}

	fn progress(&self) -> Collection<ScanProgress> {
		self.db.collection(SCAN_PROGRESS)
	}
}

fn unique(keys: Document) -> IndexModel {
	IndexModel::builder()
		.keys(keys)
		.options(IndexOptions::builder().unique(true).build())
		.build()
}

fn lookup(keys: Document) -> IndexModel {
	IndexModel::builder().keys(keys).build()
}

/// Number of records written by an unordered bulk insert, treating duplicate key rejections as
/// expected. Any other failure is returned.
fn inserted_despite_duplicates(attempted: usize, err: MongoError) -> Result<u64, StoreError> {
	match *err.kind {
		ErrorKind::BulkWrite(ref failure) if failure.write_concern_error.is_none() => {
			let rejected = failure.write_errors.as_deref().unwrap_or_default();
			match inserted_count(attempted, rejected.iter().map(|e| e.code)) {
				Some(inserted) => {
					debug!("{} duplicate records rejected", rejected.len());
					Ok(inserted)
				}
				None => Err(err.into()),
			}
		}
		_ => Err(err.into()),
	}
}

/// Records written out of `attempted`, given the error codes of the rejected ones. `None` if any
/// rejection is not a duplicate key.
fn inserted_count(attempted: usize, rejected_codes: impl IntoIterator<Item = i32>) -> Option<u64> {
	let mut rejected = 0usize;
	for code in rejected_codes {
		if code != DUPLICATE_KEY {
			return None;
		}
		rejected += 1;
	}
	Some(attempted.saturating_sub(rejected) as u64)
}

fn is_duplicate_key(err: &MongoError) -> bool {
	matches!(
		*err.kind,
		ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY
	)
}

#[async_trait::async_trait]
impl IndexStore for MongoStore {
	async fn ensure_indexes(&self) -> Result<(), StoreError> {
		self.blocks()
			.create_indexes(
				[
					unique(doc! { "height": 1 }),
					unique(doc! { "hash": 1 }),
					lookup(doc! { "timestamp": -1 }),
				],
				None,
			)
			.await?;

		self.transactions()
			.create_indexes(
				[
					unique(doc! { "blockHeight": 1, "index": 1 }),
					lookup(doc! { "timestamp": -1 }),
					lookup(doc! { "pallet": 1, "method": 1 }),
					lookup(doc! { "signer": 1 }),
					lookup(doc! { "success": 1 }),
				],
				None,
			)
			.await?;

		self.events()
			.create_indexes(
				[
					unique(doc! { "blockHeight": 1, "index": 1 }),
					lookup(doc! { "timestamp": -1 }),
					lookup(doc! { "pallet": 1, "method": 1 }),
				],
				None,
			)
			.await?;

		self.progress()
			.create_index(unique(doc! { "chainId": 1 }), None)
			.await?;

		info!("Collection indexes are in place");
		Ok(())
	}

	async fn insert_block(&self, block: &BlockRecord) -> Result<bool, StoreError> {
		match self.blocks().insert_one(block, None).await {
			Ok(_) => Ok(true),
			Err(e) if is_duplicate_key(&e) => {
				let height = to_bson(&block.height)?;
				let filter = doc! {
					"$or": [
						{ "height": height },
						{ "hash": block.hash.as_str() },
					]
				};
				match self.blocks().find_one(filter, None).await? {
					Some(existing) if !existing.conflicts_with(block) => {
						debug!("Block {} already persisted", block.height);
					}
					Some(existing) => warn!(
						"Rejected block {} ({}, chain {}): conflicts with stored block {} ({}, chain {})",
						block.height,
						block.hash,
						block.chain_id,
						existing.height,
						existing.hash,
						existing.chain_id
					),
					None => warn!(
						"Rejected block {} ({}) on a unique key, no stored block matches it",
						block.height, block.hash
					),
				}
				Ok(false)
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn insert_transactions(
		&self,
		transactions: &[TransactionRecord],
	) -> Result<u64, StoreError> {
		if transactions.is_empty() {
			return Ok(0);
		}

		let options = InsertManyOptions::builder().ordered(false).build();
		match self.transactions().insert_many(transactions, options).await {
			Ok(result) => Ok(result.inserted_ids.len() as u64),
			Err(e) => inserted_despite_duplicates(transactions.len(), e),
		}
	}

	async fn insert_events(&self, events: &[EventRecord]) -> Result<u64, StoreError> {
		if events.is_empty() {
			return Ok(0);
		}

		let options = InsertManyOptions::builder().ordered(false).build();
		match self.events().insert_many(events, options).await {
			Ok(result) => Ok(result.inserted_ids.len() as u64),
			Err(e) => inserted_despite_duplicates(events.len(), e),
		}
	}

	async fn upsert_progress(&self, progress: &ScanProgress) -> Result<(), StoreError> {
		self.progress()
			.replace_one(
				doc! { "chainId": progress.chain_id.as_str() },
				progress,
				ReplaceOptions::builder().upsert(true).build(),
			)
			.await?;
		Ok(())
	}

	async fn load_progress(&self, chain_id: &str) -> Result<Option<ScanProgress>, StoreError> {
		Ok(self
			.progress()
			.find_one(doc! { "chainId": chain_id }, None)
			.await?)
	}

	async fn block_heights(&self, chain_id: &str) -> Result<Vec<u64>, StoreError> {
		let options = FindOptions::builder()
			.sort(doc! { "height": 1 })
			.projection(doc! { "height": 1, "_id": 0 })
			.build();

		let mut cursor = self
			.db
			.collection::<Document>(BLOCKS)
			.find(doc! { "chainId": chain_id }, options)
			.await?;

		let mut heights = Vec::new();
		while let Some(document) = cursor.try_next().await? {
			let height = match document.get("height") {
				Some(Bson::Int64(height)) => u64::try_from(*height).ok(),
				Some(Bson::Int32(height)) => u64::try_from(*height).ok(),
				_ => None,
			}
			.ok_or_else(|| {
				StoreError::InvalidRecord(format!("block without a valid height: {}", document))
			})?;
			heights.push(height);
		}

		Ok(heights)
	}
}
