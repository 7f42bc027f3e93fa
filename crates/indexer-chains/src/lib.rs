//! Chain access for the vault indexer.
//!
//! Defines the [`ChainAdapter`] trait the watcher and engine program
//! against, a JSON-RPC implementation with rotating fallback endpoints and
//! bounded retries, and the decoding of raw vault logs into typed events.
//!
//! Adapters are owned per (chain, vault) unit of work and passed in at
//! construction; there is no process-wide shared client.

use async_trait::async_trait;
use indexer_types::common::{Address, BlockNumber, Log, B256};
use indexer_types::ChainId;
use thiserror::Error;

pub mod decode;
pub mod rpc;

pub use rpc::{RpcChainAdapter, RpcConfig};

/// Errors from chain access.
///
/// Everything except `Decode` is transient from the pipeline's point of
/// view: retried with backoff, then deferred to the next poll cycle.
#[derive(Debug, Error)]
pub enum ChainError {
	/// Timeout, connection failure, rate limiting. Retryable.
	#[error("transient chain error: {0}")]
	Transient(String),

	/// JSON-RPC level error response from the node.
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },

	/// The node returned data we could not decode. Not retryable.
	#[error("decode error: {0}")]
	Decode(String),
}

impl ChainError {
	pub const fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Rpc { .. })
	}
}

/// Read-only access to one chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
	/// Chain this adapter is connected to.
	fn chain_id(&self) -> ChainId;

	/// Current head block number.
	async fn block_number(&self) -> Result<BlockNumber, ChainError>;

	/// Hash of `block`, or `None` if the chain does not have it (e.g. it
	/// was reorged away and not yet re-mined).
	async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>, ChainError>;

	/// Timestamp (unix seconds) of `block`.
	async fn block_timestamp(&self, block: BlockNumber) -> Result<u64, ChainError>;

	/// Logs emitted by `address` in `[from_block, to_block]`, optionally
	/// filtered to the given topic0 signatures.
	async fn get_logs(
		&self,
		address: Address,
		topics: &[B256],
		from_block: BlockNumber,
		to_block: BlockNumber,
	) -> Result<Vec<Log>, ChainError>;

	/// Read-only contract call against the latest state.
	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError>;
}
