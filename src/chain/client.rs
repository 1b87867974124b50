//!
//! Subxt backed client for the remote ledger.
//!
//! This module implements [`LedgerApi`] on top of a Substrate node's JSON-RPC interface.
//! Block hashes and the chain head come from the legacy RPC methods; block bodies, events and
//! storage reads go through the `OnlineClient`, which decodes everything against the runtime
//! metadata fetched at connection time.

use super::types::*;
use crate::utils::format_hash;

use subxt::{
	OnlineClient, PolkadotConfig,
	backend::{legacy::LegacyRpcMethods, rpc::RpcClient},
	config::{Hasher, substrate::BlakeTwo256},
	error::{DispatchError, RpcError},
	events::Phase,
	ext::{
		codec::Decode,
		scale_value::{Composite, Primitive, Value, ValueDef},
	},
	utils::{AccountId32, H256, MultiAddress},
};
use tracing::{debug, info, warn};

/// Remote ledger client talking to a Substrate node
#[derive(Clone)]
pub struct SubxtLedgerClient {
	/// Metadata aware client used for blocks, events and storage.
	api: OnlineClient<PolkadotConfig>,
	/// Raw RPC methods for hash and header lookups.
	rpc: LegacyRpcMethods<PolkadotConfig>,
}

impl SubxtLedgerClient {
	/// Connect to the node at `url` (ws:// or wss://).
	///
	/// # Returns
	/// A connected client, or a `ChainError` if the connection or metadata download fails.
	pub async fn connect(url: &str) -> Result<Self, ChainError> {
		debug!("Connecting to ledger node at {}", url);
		let rpc_client = RpcClient::from_url(url).await?;
		let api = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client.clone()).await?;
		let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client);

		info!(
			"Connected to ledger node at {} (spec version {})",
			url,
			api.runtime_version().spec_version
		);
		Ok(Self { api, rpc })
	}

	/// Resolve a `System.ExtrinsicFailed` payload into `Pallet.Error` or the dispatch error text.
	fn describe_dispatch_error(&self, field_bytes: &[u8]) -> Option<String> {
		match DispatchError::decode_from(field_bytes, self.api.metadata()) {
			Ok(DispatchError::Module(module_error)) => match module_error.details() {
				Ok(details) => Some(format!(
					"{}.{}",
					details.pallet.name(),
					details.variant.name
				)),
				Err(e) => {
					debug!("Module error not found in metadata: {}", e);
					None
				}
			},
			Ok(other) => Some(other.to_string()),
			Err(e) => {
				debug!("Failed to decode dispatch error: {}", e);
				None
			}
		}
	}
}

/// Split RPC failures into transport faults and errors reported by the node.
fn rpc_error(err: subxt::Error) -> ChainError {
	match err {
		subxt::Error::Rpc(RpcError::ClientError(e)) => ChainError::Transport(e.to_string()),
		subxt::Error::Rpc(RpcError::SubscriptionDropped) => {
			ChainError::Transport("subscription dropped".to_string())
		}
		subxt::Error::Rpc(other) => ChainError::Rpc(other.to_string()),
		other => ChainError::Subxt(other),
	}
}

/// Render a decoded SCALE value as JSON.
///
/// Unit variants become their name, other variants a single-key object and byte sequences hex
/// strings. Integers outside the signed 64-bit range become decimal strings, since BSON has no
/// unsigned 64-bit type.
fn value_to_json<T>(value: &Value<T>) -> serde_json::Value {
	match &value.value {
		ValueDef::Composite(composite) => composite_to_json(composite),
		ValueDef::Variant(variant) => {
			if variant.values.is_empty() {
				serde_json::Value::String(variant.name.clone())
			} else {
				let mut object = serde_json::Map::new();
				object.insert(variant.name.clone(), composite_to_json(&variant.values));
				serde_json::Value::Object(object)
			}
		}
		ValueDef::BitSequence(bits) => {
			serde_json::Value::Array(bits.iter().map(serde_json::Value::Bool).collect())
		}
		ValueDef::Primitive(primitive) => match primitive {
			Primitive::Bool(b) => serde_json::Value::Bool(*b),
			Primitive::Char(c) => serde_json::Value::String(c.to_string()),
			Primitive::String(s) => serde_json::Value::String(s.clone()),
			Primitive::U128(n) => match i64::try_from(*n) {
				Ok(n) => serde_json::Value::from(n),
				Err(_) => serde_json::Value::String(n.to_string()),
			},
			Primitive::I128(n) => match i64::try_from(*n) {
				Ok(n) => serde_json::Value::from(n),
				Err(_) => serde_json::Value::String(n.to_string()),
			},
			Primitive::U256(bytes) | Primitive::I256(bytes) => {
				serde_json::Value::String(format_hash(bytes))
			}
		},
	}
}

fn composite_to_json<T>(composite: &Composite<T>) -> serde_json::Value {
	match composite {
		Composite::Named(fields) => serde_json::Value::Object(
			fields
				.iter()
				.map(|(name, value)| (name.clone(), value_to_json(value)))
				.collect(),
		),
		Composite::Unnamed(values) => match as_bytes(values) {
			Some(bytes) if !bytes.is_empty() => serde_json::Value::String(format_hash(&bytes)),
			_ => serde_json::Value::Array(values.iter().map(value_to_json).collect()),
		},
	}
}

/// A sequence made only of `u8` sized primitives.
fn as_bytes<T>(values: &[Value<T>]) -> Option<Vec<u8>> {
	values
		.iter()
		.map(|value| match &value.value {
			ValueDef::Primitive(Primitive::U128(n)) => u8::try_from(*n).ok(),
			_ => None,
		})
		.collect()
}

/// Decoded call arguments keyed by name; unnamed fields are keyed by position.
fn composite_to_args<T>(composite: &Composite<T>) -> Vec<(String, serde_json::Value)> {
	match composite {
		Composite::Named(fields) => fields
			.iter()
			.map(|(name, value)| (name.clone(), value_to_json(value)))
			.collect(),
		Composite::Unnamed(values) => values
			.iter()
			.enumerate()
			.map(|(i, value)| (i.to_string(), value_to_json(value)))
			.collect(),
	}
}

fn decode_signer(address_bytes: &[u8]) -> Option<String> {
	match MultiAddress::<AccountId32, ()>::decode(&mut &address_bytes[..]) {
		Ok(MultiAddress::Id(account)) => Some(account.to_string()),
		Ok(MultiAddress::Address20(bytes)) => Some(format!("0x{}", hex::encode(bytes))),
		Ok(MultiAddress::Address32(bytes)) => Some(format!("0x{}", hex::encode(bytes))),
		Ok(MultiAddress::Raw(bytes)) => Some(format!("0x{}", hex::encode(bytes))),
		Ok(MultiAddress::Index(_)) => None,
		Err(e) => {
			debug!("Failed to decode signer address: {}", e);
			None
		}
	}
}

#[async_trait::async_trait]
impl LedgerApi for SubxtLedgerClient {
	type Hash = H256;

	async fn chain_height(&self) -> Result<u64, ChainError> {
		let header = self
			.rpc
			.chain_get_header(None)
			.await
			.map_err(rpc_error)?
			.ok_or(ChainError::MissingHeader)?;
		Ok(header.number.into())
	}

	async fn block_hash(&self, height: u64) -> Result<H256, ChainError> {
		self.rpc
			.chain_get_block_hash(Some(height.into()))
			.await
			.map_err(rpc_error)?
			.ok_or(ChainError::UnknownBlock(height))
	}

	async fn block_body(&self, height: u64, hash: H256) -> Result<RawBlockBody, ChainError> {
		let block = self.api.blocks().at(hash).await?;
		let header = block.header();
		let extrinsics = block.extrinsics().await?;

		let mut raw_extrinsics = Vec::with_capacity(extrinsics.len());
		for ext in extrinsics.iter() {
			let ext = ext?;

			let args = match ext.field_values() {
				Ok(values) => ExtrinsicArgs::Decoded(composite_to_args(&values)),
				Err(e) => ExtrinsicArgs::Undecodable(e.to_string()),
			};

			let (nonce, tip) = match ext.signed_extensions() {
				Some(extensions) => (extensions.nonce(), extensions.tip()),
				None => (None, None),
			};

			raw_extrinsics.push(RawExtrinsic {
				index: ext.index(),
				hash: format_hash(BlakeTwo256::hash(ext.bytes()).as_bytes()),
				pallet: ext.pallet_name()?.to_string(),
				call: ext.variant_name()?.to_string(),
				args,
				signer: ext.address_bytes().and_then(decode_signer),
				nonce,
				tip,
				signed: ext.is_signed(),
			});
		}

		Ok(RawBlockBody {
			height,
			hash: format_hash(hash.as_bytes()),
			parent_hash: format_hash(header.parent_hash.as_bytes()),
			state_root: format_hash(header.state_root.as_bytes()),
			extrinsics_root: format_hash(header.extrinsics_root.as_bytes()),
			extrinsics: raw_extrinsics,
		})
	}

	async fn events_at(&self, hash: H256) -> Result<Vec<RawEvent>, ChainError> {
		let events = self.api.events().at(hash).await?;

		let mut raw_events = Vec::with_capacity(events.len() as usize);
		for event in events.iter() {
			let event = event.map_err(subxt::Error::from)?;

			let phase = match event.phase() {
				Phase::Initialization => EventPhase::Initialization,
				Phase::ApplyExtrinsic(index) => EventPhase::ApplyExtrinsic(index),
				Phase::Finalization => EventPhase::Finalization,
			};

			let data = match event.field_values() {
				Ok(values) => values.values().map(value_to_json).collect(),
				Err(e) => {
					warn!("Failed to decode fields of event {}: {}", event.index(), e);
					Vec::new()
				}
			};

			let dispatch_error =
				if event.pallet_name() == "System" && event.variant_name() == "ExtrinsicFailed" {
					self.describe_dispatch_error(event.field_bytes())
				} else {
					None
				};

			raw_events.push(RawEvent {
				index: event.index(),
				phase,
				pallet: event.pallet_name().to_string(),
				variant: event.variant_name().to_string(),
				data,
				topics: event
					.topics()
					.iter()
					.map(|topic| format_hash(topic.as_bytes()))
					.collect(),
				dispatch_error,
			});
		}

		Ok(raw_events)
	}

	async fn timestamp_at(&self, hash: H256) -> Result<u64, ChainError> {
		let address = subxt::dynamic::storage("Timestamp", "Now", ());
		let now = self
			.api
			.storage()
			.at(hash)
			.fetch(&address)
			.await?
			.ok_or_else(|| ChainError::MissingTimestamp(format_hash(hash.as_bytes())))?;

		now.as_type::<u64>()
			.map_err(|e| ChainError::Decode(format!("Timestamp::Now: {}", e)))
	}
}
