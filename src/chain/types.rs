//! Types for the remote ledger capability and the raw payloads it returns

/// Execution phase an event was emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    /// Emitted while initializing the block (before any extrinsic is applied).
    Initialization,
    /// Emitted while applying the extrinsic at the given index.
    ApplyExtrinsic(u32),
    /// Emitted while finalizing the block.
    Finalization,
}

impl EventPhase {
    /// The extrinsic index for apply-phase events, `None` otherwise
    pub fn extrinsic_index(&self) -> Option<u32> {
        match self {
            EventPhase::ApplyExtrinsic(index) => Some(*index),
            _ => None,
        }
    }

    /// The tag persisted in event records.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPhase::Initialization => "Initialization",
            EventPhase::ApplyExtrinsic(_) => "ApplyExtrinsic",
            EventPhase::Finalization => "Finalization",
        }
    }
}

/// Decoded call arguments of an extrinsic.
///
/// Argument decoding is allowed to fail for a single extrinsic without failing the block;
/// the failure reason is kept so the normalizer can log it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtrinsicArgs {
    /// Argument names paired with their decoded values, in declaration order.
    Decoded(Vec<(String, serde_json::Value)>),
    /// The arguments could not be decoded.
    Undecodable(String),
}

/// An extrinsic as returned by the remote ledger, before normalization.
#[derive(Debug, Clone)]
pub struct RawExtrinsic {
    /// Position of the extrinsic within its block.
    pub index: u32,
    /// Hex encoded extrinsic hash.
    pub hash: String,
    /// Pallet (namespace) name.
    pub pallet: String,
    /// Call (method) name.
    pub call: String,
    /// Decoded call arguments.
    pub args: ExtrinsicArgs,
    /// Signer account, if signed and the address could be decoded.
    pub signer: Option<String>,
    /// Account nonce, signed extrinsics only.
    pub nonce: Option<u64>,
    /// Tip paid, signed extrinsics only.
    pub tip: Option<u128>,
    /// Whether the extrinsic carries a signature.
    pub signed: bool,
}

/// An event as returned by the remote ledger, before normalization.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Position of the event within the block's event list.
    pub index: u32,
    /// The phase the event was emitted in.
    pub phase: EventPhase,
    /// Pallet (namespace) name.
    pub pallet: String,
    /// Event variant (method) name.
    pub variant: String,
    /// Decoded event fields, in order.
    pub data: Vec<serde_json::Value>,
    /// Hex encoded topics.
    pub topics: Vec<String>,
    /// For `System.ExtrinsicFailed`, the dispatch error resolved against chain metadata.
    pub dispatch_error: Option<String>,
}

/// Header and body of a block.
#[derive(Debug, Clone)]
pub struct RawBlockBody {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub extrinsics_root: String,
    pub extrinsics: Vec<RawExtrinsic>,
}

/// Everything fetched for a single height.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub body: RawBlockBody,
    pub events: Vec<RawEvent>,
    /// Block timestamp in milliseconds since the epoch.
    pub timestamp: u64,
}

impl RawBlock {
    pub fn height(&self) -> u64 {
        self.body.height
    }
}

/// Remote ledger capability.
///
/// Any client (native RPC, mocked, simulated) that can answer these queries can drive the
/// ingestion pipeline. `Hash` stays opaque to the pipeline: it is only ever handed back to the
/// same client.
#[async_trait::async_trait]
pub trait LedgerApi: Send + Sync + 'static {
    /// Block hash type of the remote chain.
    type Hash: Copy + Send + Sync + std::fmt::Debug + 'static;

    /// Current chain height.
    async fn chain_height(&self) -> Result<u64, ChainError>;

    /// Hash of the block at `height`.
    async fn block_hash(&self, height: u64) -> Result<Self::Hash, ChainError>;

    /// Header and extrinsics of the block.
    async fn block_body(&self, height: u64, hash: Self::Hash) -> Result<RawBlockBody, ChainError>;

    /// All events emitted in the block, read from the state at `hash`.
    async fn events_at(&self, hash: Self::Hash) -> Result<Vec<RawEvent>, ChainError>;

    /// Block timestamp in milliseconds, read from the state at `hash`.
    async fn timestamp_at(&self, hash: Self::Hash) -> Result<u64, ChainError>;
}

/// Error types for remote ledger operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Subxt error: {0}")]
    Subxt(#[from] subxt::Error),

    #[error("No block hash for height {0}")]
    UnknownBlock(u64),

    #[error("No header returned for the chain head")]
    MissingHeader,

    #[error("No timestamp stored for block {0}")]
    MissingTimestamp(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}
