//! In-memory ledger implementation.
//!
//! Backs the tests and serves as the canonical reference for the uniqueness
//! and idempotency semantics every backend must honor. Lookups that a
//! database would serve from secondary indexes are linear scans here; the
//! collections involved stay small enough for that to be a non-issue.

use crate::{LedgerStore, StorageError, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexer_types::common::{Address, BlockNumber, B256};
use indexer_types::{
	Amount, Cursor, Deposit, DepositIntent, DepositStatus, IntentStatus, Snapshot, Withdrawal,
	WithdrawalStatus,
};

/// In-memory ledger backed by concurrent maps.
#[derive(Default)]
pub struct MemoryLedger {
	pub(crate) intents: DashMap<B256, DepositIntent>,
	pub(crate) deposits: DashMap<B256, Deposit>,
	pub(crate) withdrawals: DashMap<B256, Withdrawal>,
	pub(crate) snapshots: DashMap<(Address, NaiveDate), Snapshot>,
	pub(crate) cursors: DashMap<String, Cursor>,
}

impl MemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}
}

fn in_window(at: DateTime<Utc>, after: Option<DateTime<Utc>>, until: DateTime<Utc>) -> bool {
	after.map_or(true, |a| at > a) && at <= until
}

#[async_trait]
impl LedgerStore for MemoryLedger {
	async fn insert_intent(&self, intent: &DepositIntent) -> Result<(), StorageError> {
		match self.intents.entry(intent.intent_hash) {
			Entry::Occupied(_) => Err(StorageError::Conflict(format!(
				"intent {}",
				intent.intent_hash
			))),
			Entry::Vacant(entry) => {
				entry.insert(intent.clone());
				Ok(())
			}
		}
	}

	async fn get_intent(&self, intent_hash: &B256) -> Result<Option<DepositIntent>, StorageError> {
		Ok(self.intents.get(intent_hash).map(|e| e.clone()))
	}

	async fn update_intent(&self, intent: &DepositIntent) -> Result<(), StorageError> {
		match self.intents.entry(intent.intent_hash) {
			Entry::Occupied(mut entry) => {
				entry.insert(intent.clone());
				Ok(())
			}
			Entry::Vacant(_) => Err(StorageError::NotFound),
		}
	}

	async fn highest_nonce(
		&self,
		user: &Address,
		vault: &Address,
	) -> Result<Option<u64>, StorageError> {
		Ok(self
			.intents
			.iter()
			.filter(|e| e.user_address == *user && e.vault_address == *vault)
			.map(|e| e.nonce)
			.max())
	}

	async fn find_pending_intent(
		&self,
		user: &Address,
		vault: &Address,
		amount: &Amount,
	) -> Result<Option<DepositIntent>, StorageError> {
		Ok(self
			.intents
			.iter()
			.filter(|e| {
				e.status == IntentStatus::Pending
					&& e.user_address == *user
					&& e.vault_address == *vault
					&& e.amount == *amount
			})
			.map(|e| e.clone())
			.min_by_key(|intent| intent.nonce))
	}

	async fn pending_intents_before(
		&self,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<DepositIntent>, StorageError> {
		Ok(self
			.intents
			.iter()
			.filter(|e| e.status == IntentStatus::Pending && e.created_at <= cutoff)
			.map(|e| e.clone())
			.collect())
	}

	async fn intents_by_user(&self, user: &Address) -> Result<Vec<DepositIntent>, StorageError> {
		let mut rows: Vec<_> = self
			.intents
			.iter()
			.filter(|e| e.user_address == *user)
			.map(|e| e.clone())
			.collect();
		rows.sort_by_key(|r| r.created_at);
		Ok(rows)
	}

	async fn upsert_deposit(&self, deposit: &Deposit) -> Result<UpsertOutcome, StorageError> {
		match self.deposits.entry(deposit.transaction_hash) {
			Entry::Vacant(entry) => {
				entry.insert(deposit.clone());
				Ok(UpsertOutcome::Inserted)
			}
			Entry::Occupied(mut entry) => {
				// A confirmed row is final: re-delivery of the same
				// transaction must be a no-op regardless of payload drift
				// (e.g. an epoch observed later during reorg replay).
				if entry.get().status == DepositStatus::Confirmed || entry.get() == deposit {
					Ok(UpsertOutcome::AlreadyProcessed)
				} else {
					entry.insert(deposit.clone());
					Ok(UpsertOutcome::Updated)
				}
			}
		}
	}

	async fn get_deposit(&self, transaction_hash: &B256) -> Result<Option<Deposit>, StorageError> {
		Ok(self.deposits.get(transaction_hash).map(|e| e.clone()))
	}

	async fn confirmed_deposits_between(
		&self,
		vault: &Address,
		after: Option<DateTime<Utc>>,
		until: DateTime<Utc>,
	) -> Result<Vec<Deposit>, StorageError> {
		let mut rows: Vec<_> = self
			.deposits
			.iter()
			.filter(|e| {
				e.vault_address == *vault
					&& e.status == DepositStatus::Confirmed
					&& in_window(e.created_at, after, until)
			})
			.map(|e| e.clone())
			.collect();
		rows.sort_by_key(|r| r.created_at);
		Ok(rows)
	}

	async fn deposits_by_user(&self, user: &Address) -> Result<Vec<Deposit>, StorageError> {
		let mut rows: Vec<_> = self
			.deposits
			.iter()
			.filter(|e| e.user_address == *user)
			.map(|e| e.clone())
			.collect();
		rows.sort_by_key(|r| r.created_at);
		Ok(rows)
	}

	async fn upsert_withdrawal(
		&self,
		withdrawal: &Withdrawal,
	) -> Result<UpsertOutcome, StorageError> {
		match self.withdrawals.entry(withdrawal.transaction_hash) {
			Entry::Vacant(entry) => {
				entry.insert(withdrawal.clone());
				Ok(UpsertOutcome::Inserted)
			}
			Entry::Occupied(mut entry) => {
				if entry.get().status == WithdrawalStatus::Confirmed || entry.get() == withdrawal {
					Ok(UpsertOutcome::AlreadyProcessed)
				} else {
					entry.insert(withdrawal.clone());
					Ok(UpsertOutcome::Updated)
				}
			}
		}
	}

	async fn get_withdrawal(
		&self,
		transaction_hash: &B256,
	) -> Result<Option<Withdrawal>, StorageError> {
		Ok(self.withdrawals.get(transaction_hash).map(|e| e.clone()))
	}

	async fn confirmed_withdrawals_between(
		&self,
		vault: &Address,
		after: Option<DateTime<Utc>>,
		until: DateTime<Utc>,
	) -> Result<Vec<Withdrawal>, StorageError> {
		let mut rows: Vec<_> = self
			.withdrawals
			.iter()
			.filter(|e| {
				e.vault_address == *vault
					&& e.status == WithdrawalStatus::Confirmed
					&& in_window(e.created_at, after, until)
			})
			.map(|e| e.clone())
			.collect();
		rows.sort_by_key(|r| r.created_at);
		Ok(rows)
	}

	async fn withdrawals_by_user(&self, user: &Address) -> Result<Vec<Withdrawal>, StorageError> {
		let mut rows: Vec<_> = self
			.withdrawals
			.iter()
			.filter(|e| e.user_address == *user)
			.map(|e| e.clone())
			.collect();
		rows.sort_by_key(|r| r.created_at);
		Ok(rows)
	}

	async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
		match self
			.snapshots
			.entry((snapshot.vault_address, snapshot.date))
		{
			Entry::Occupied(_) => Err(StorageError::Conflict(format!(
				"snapshot {} {}",
				snapshot.vault_address, snapshot.date
			))),
			Entry::Vacant(entry) => {
				entry.insert(snapshot.clone());
				Ok(())
			}
		}
	}

	async fn get_snapshot(
		&self,
		vault: &Address,
		date: NaiveDate,
	) -> Result<Option<Snapshot>, StorageError> {
		Ok(self.snapshots.get(&(*vault, date)).map(|e| e.clone()))
	}

	async fn latest_snapshot_before(
		&self,
		vault: &Address,
		date: NaiveDate,
	) -> Result<Option<Snapshot>, StorageError> {
		Ok(self
			.snapshots
			.iter()
			.filter(|e| e.vault_address == *vault && e.date < date)
			.map(|e| e.clone())
			.max_by_key(|s| s.date))
	}

	async fn get_cursor(&self, chain_key: &str) -> Result<Option<Cursor>, StorageError> {
		Ok(self.cursors.get(chain_key).map(|e| e.clone()))
	}

	async fn put_cursor_if(
		&self,
		chain_key: &str,
		expected: Option<BlockNumber>,
		cursor: &Cursor,
	) -> Result<(), StorageError> {
		match self.cursors.entry(chain_key.to_string()) {
			Entry::Occupied(mut entry) => {
				if expected != Some(entry.get().last_block) {
					return Err(StorageError::Conflict(format!("cursor {chain_key}")));
				}
				entry.insert(cursor.clone());
				Ok(())
			}
			Entry::Vacant(entry) => {
				if expected.is_some() {
					return Err(StorageError::Conflict(format!("cursor {chain_key}")));
				}
				entry.insert(cursor.clone());
				Ok(())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn intent(nonce: u64, amount: u64, status: IntentStatus) -> DepositIntent {
		DepositIntent {
			intent_hash: B256::from(alloy::primitives::U256::from(nonce)),
			user_address: Address::from([1u8; 20]),
			vault_address: Address::from([2u8; 20]),
			asset_address: Address::from([3u8; 20]),
			amount: Amount::from(amount),
			nonce,
			status,
			created_at: Utc::now(),
			executed_at: None,
		}
	}

	fn deposit(tx: u8, status: DepositStatus) -> Deposit {
		Deposit {
			intent_hash: None,
			user_address: Address::from([1u8; 20]),
			vault_address: Address::from([2u8; 20]),
			amount: Amount::from(100u64),
			shares: None,
			epoch_id: None,
			status,
			block_number: 10,
			transaction_hash: B256::from([tx; 32]),
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_intent_hash_is_unique() {
		let ledger = MemoryLedger::new();
		let row = intent(1, 100, IntentStatus::Pending);
		ledger.insert_intent(&row).await.unwrap();
		assert!(matches!(
			ledger.insert_intent(&row).await,
			Err(StorageError::Conflict(_))
		));
	}

	#[tokio::test]
	async fn test_find_pending_intent_prefers_lowest_nonce() {
		let ledger = MemoryLedger::new();
		ledger
			.insert_intent(&intent(5, 100, IntentStatus::Pending))
			.await
			.unwrap();
		ledger
			.insert_intent(&intent(2, 100, IntentStatus::Pending))
			.await
			.unwrap();
		ledger
			.insert_intent(&intent(1, 100, IntentStatus::Executed))
			.await
			.unwrap();

		let found = ledger
			.find_pending_intent(
				&Address::from([1u8; 20]),
				&Address::from([2u8; 20]),
				&Amount::from(100u64),
			)
			.await
			.unwrap()
			.expect("pending intent");
		assert_eq!(found.nonce, 2);
	}

	#[tokio::test]
	async fn test_deposit_upsert_is_idempotent() {
		let ledger = MemoryLedger::new();
		let row = deposit(1, DepositStatus::Confirmed);
		assert_eq!(
			ledger.upsert_deposit(&row).await.unwrap(),
			UpsertOutcome::Inserted
		);
		assert_eq!(
			ledger.upsert_deposit(&row).await.unwrap(),
			UpsertOutcome::AlreadyProcessed
		);

		// A confirmed row is never overwritten, even by drifted payloads.
		let mut drifted = row.clone();
		drifted.epoch_id = Some(9);
		assert_eq!(
			ledger.upsert_deposit(&drifted).await.unwrap(),
			UpsertOutcome::AlreadyProcessed
		);
		assert_eq!(
			ledger
				.get_deposit(&row.transaction_hash)
				.await
				.unwrap()
				.unwrap()
				.epoch_id,
			None
		);
	}

	#[tokio::test]
	async fn test_pending_deposit_can_be_confirmed() {
		let ledger = MemoryLedger::new();
		let mut row = deposit(1, DepositStatus::Pending);
		ledger.upsert_deposit(&row).await.unwrap();
		row.status = DepositStatus::Confirmed;
		row.shares = Some(Amount::from(90u64));
		assert_eq!(
			ledger.upsert_deposit(&row).await.unwrap(),
			UpsertOutcome::Updated
		);
	}

	#[tokio::test]
	async fn test_snapshot_unique_on_date_and_vault() {
		let ledger = MemoryLedger::new();
		let snapshot = Snapshot {
			date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
			vault_address: Address::from([2u8; 20]),
			total_assets: Amount::from(1u64),
			total_supply: Amount::from(1u64),
			total_deposits: Amount::ZERO,
			total_withdrawals: Amount::ZERO,
			deposit_epoch_id: 0,
			redeem_epoch_id: 0,
			created_at: Utc::now(),
		};
		ledger.insert_snapshot(&snapshot).await.unwrap();
		assert!(matches!(
			ledger.insert_snapshot(&snapshot).await,
			Err(StorageError::Conflict(_))
		));
	}

	#[tokio::test]
	async fn test_cursor_compare_and_set() {
		let ledger = MemoryLedger::new();
		let cursor = Cursor {
			chain_key: "ethereum:v".to_string(),
			last_block: 100,
			last_hash: B256::from([1u8; 32]),
			recent_hashes: vec![(100, B256::from([1u8; 32]))],
			updated_at: Utc::now(),
		};

		// First write expects no prior cursor.
		assert!(matches!(
			ledger.put_cursor_if("ethereum:v", Some(99), &cursor).await,
			Err(StorageError::Conflict(_))
		));
		ledger.put_cursor_if("ethereum:v", None, &cursor).await.unwrap();

		// Double-advance from a stale view fails the CAS.
		let mut next = cursor.clone();
		next.last_block = 110;
		assert!(matches!(
			ledger.put_cursor_if("ethereum:v", Some(90), &next).await,
			Err(StorageError::Conflict(_))
		));
		ledger
			.put_cursor_if("ethereum:v", Some(100), &next)
			.await
			.unwrap();
		assert_eq!(
			ledger.get_cursor("ethereum:v").await.unwrap().unwrap().last_block,
			110
		);
	}
}
