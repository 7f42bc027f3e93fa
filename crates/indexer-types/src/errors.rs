//! Error taxonomy for the indexer system.

use crate::common::{Address, BlockNumber};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Synchronous rejection of an intent submission. Never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("signature does not recover to the declared user")]
	BadSignature,

	#[error("malformed signature: {0}")]
	MalformedSignature(String),

	#[error("nonce {submitted} must exceed last accepted nonce {highest} for this user and vault")]
	StaleNonce { submitted: u64, highest: u64 },

	#[error("submission window expired at {deadline}")]
	ExpiredWindow { deadline: u64 },

	#[error("vault {0} is not configured")]
	UnknownVault(Address),
}

#[derive(Error, Debug)]
pub enum IndexerError {
	#[error("validation error: {0}")]
	Validation(#[from] ValidationError),

	/// RPC timeout, rate limiting, connection failure. Retried with bounded
	/// backoff; surfaced only as a delayed poll, never fatal.
	#[error("transient chain error: {0}")]
	TransientChain(String),

	/// A recorded block hash at or below the cursor no longer matches the
	/// chain. Triggers cursor rollback and re-processing.
	#[error("reorg detected on {chain_key}: block {block} hash mismatch")]
	ReorgDetected { chain_key: String, block: BlockNumber },

	/// Missing or invalid required per-vault parameter. Stops only that
	/// vault's unit of work.
	#[error("fatal config error for vault {vault}: {reason}")]
	FatalConfig { vault: String, reason: String },

	#[error("storage error: {0}")]
	Storage(String),
}
