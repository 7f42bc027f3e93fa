//! Persistent ledger storage for the vault indexer.
//!
//! This crate provides the `LedgerStore` trait over the four ledger
//! collections (`deposit_intents`, `deposits`, `withdrawals`, `snapshots`)
//! and the per-chain cursor records, with two backends: an in-memory store
//! used by tests and a file-backed store for deployments without an external
//! database.
//!
//! All upserts are idempotent and all uniqueness constraints of the data
//! model are enforced here: unique `intent_hash`, unique confirmed
//! `transaction_hash`, unique (`date`, `vault_address`) on snapshots.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use indexer_types::common::{Address, BlockNumber, B256};
use indexer_types::{Cursor, Deposit, DepositIntent, Snapshot, Withdrawal};
use thiserror::Error;

pub mod cursor;
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use cursor::CursorStore;
pub use implementations::file::FileLedger;
pub use implementations::memory::MemoryLedger;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// A requested record does not exist.
	#[error("not found")]
	NotFound,
	/// A unique-index collision. Idempotent callers treat this as "already
	/// processed".
	#[error("conflict on {0}")]
	Conflict(String),
	/// Serialization/deserialization failure.
	#[error("serialization error: {0}")]
	Serialization(String),
	/// Backend I/O failure.
	#[error("backend error: {0}")]
	Backend(String),
}

/// Outcome of an idempotent upsert keyed by transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
	/// A new row was created.
	Inserted,
	/// An existing row was updated in place (same key, new state).
	Updated,
	/// The row already held this state; nothing was written.
	AlreadyProcessed,
}

/// Typed interface over the ledger collections and cursor records.
///
/// Implementations must be safe to share across tasks; coordination between
/// units of work happens only through the compare-and-set on cursors and the
/// unique indexes enforced here.
#[async_trait]
pub trait LedgerStore: Send + Sync {
	// --- deposit_intents ---

	/// Inserts a new intent. Fails with [`StorageError::Conflict`] if the
	/// `intent_hash` already exists.
	async fn insert_intent(&self, intent: &DepositIntent) -> Result<(), StorageError>;

	async fn get_intent(&self, intent_hash: &B256) -> Result<Option<DepositIntent>, StorageError>;

	/// Replaces an existing intent row (status transitions only).
	async fn update_intent(&self, intent: &DepositIntent) -> Result<(), StorageError>;

	/// Highest nonce ever accepted for (user, vault), across all statuses.
	async fn highest_nonce(
		&self,
		user: &Address,
		vault: &Address,
	) -> Result<Option<u64>, StorageError>;

	/// Pending intent matching (user, vault, amount) exactly, lowest nonce
	/// first so matching is deterministic.
	async fn find_pending_intent(
		&self,
		user: &Address,
		vault: &Address,
		amount: &indexer_types::Amount,
	) -> Result<Option<DepositIntent>, StorageError>;

	/// Pending intents created at or before `cutoff`, for the expiry sweep.
	async fn pending_intents_before(
		&self,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<DepositIntent>, StorageError>;

	/// Intents for one user, ordered by `created_at` ascending.
	async fn intents_by_user(&self, user: &Address) -> Result<Vec<DepositIntent>, StorageError>;

	// --- deposits ---

	/// Idempotent upsert keyed by `transaction_hash`. Re-delivering an
	/// identical row is a no-op reported as `AlreadyProcessed`.
	async fn upsert_deposit(&self, deposit: &Deposit) -> Result<UpsertOutcome, StorageError>;

	async fn get_deposit(&self, transaction_hash: &B256) -> Result<Option<Deposit>, StorageError>;

	/// Confirmed deposits for `vault` with `created_at` in (`after`, `until`].
	async fn confirmed_deposits_between(
		&self,
		vault: &Address,
		after: Option<DateTime<Utc>>,
		until: DateTime<Utc>,
	) -> Result<Vec<Deposit>, StorageError>;

	/// Deposits for one user, ordered by `created_at` ascending.
	async fn deposits_by_user(&self, user: &Address) -> Result<Vec<Deposit>, StorageError>;

	// --- withdrawals ---

	/// Idempotent upsert keyed by `transaction_hash`.
	async fn upsert_withdrawal(
		&self,
		withdrawal: &Withdrawal,
	) -> Result<UpsertOutcome, StorageError>;

	async fn get_withdrawal(
		&self,
		transaction_hash: &B256,
	) -> Result<Option<Withdrawal>, StorageError>;

	/// Confirmed withdrawals for `vault` with `created_at` in (`after`, `until`].
	async fn confirmed_withdrawals_between(
		&self,
		vault: &Address,
		after: Option<DateTime<Utc>>,
		until: DateTime<Utc>,
	) -> Result<Vec<Withdrawal>, StorageError>;

	/// Withdrawals for one user, ordered by `created_at` ascending.
	async fn withdrawals_by_user(&self, user: &Address) -> Result<Vec<Withdrawal>, StorageError>;

	// --- snapshots ---

	/// Inserts a snapshot. Fails with [`StorageError::Conflict`] if the
	/// (`date`, `vault_address`) pair already exists; snapshots are never
	/// patched in place.
	async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

	async fn get_snapshot(
		&self,
		vault: &Address,
		date: NaiveDate,
	) -> Result<Option<Snapshot>, StorageError>;

	/// Latest snapshot for `vault` strictly before `date`.
	async fn latest_snapshot_before(
		&self,
		vault: &Address,
		date: NaiveDate,
	) -> Result<Option<Snapshot>, StorageError>;

	// --- cursors ---

	async fn get_cursor(&self, chain_key: &str) -> Result<Option<Cursor>, StorageError>;

	/// Stores `cursor` only if the current `last_block` equals `expected`
	/// (`None` meaning no cursor exists yet). Fails with
	/// [`StorageError::Conflict`] otherwise. This compare-and-set is the only
	/// coordination point between duplicate watcher instances.
	async fn put_cursor_if(
		&self,
		chain_key: &str,
		expected: Option<BlockNumber>,
		cursor: &Cursor,
	) -> Result<(), StorageError>;
}
