//! Reconciliation of confirmed chain events against the ledger.
//!
//! The engine is the only writer of `deposits` and `withdrawals` rows. It
//! consumes batches of confirmed, decoded events in strict chain order,
//! matches deposits against pending signed intents, stamps every row with the
//! vault's current epoch counters, and leans on the ledger's idempotent
//! upserts so that redelivered batches after a crash or reorg replay are
//! harmless.

use indexer_intents::IntentRegistry;
use indexer_storage::{LedgerStore, StorageError, UpsertOutcome};
use indexer_types::common::Address;
use indexer_types::{
	ChainEvent, Deposit, DepositStatus, IndexerError, IntentStatus, VaultContext, VaultEvent,
	Withdrawal, WithdrawalStatus,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod epochs;

pub use epochs::{EpochTracker, VaultEpochs};

/// Counters for one processed batch, surfaced in watcher logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
	pub deposits: usize,
	pub withdrawals: usize,
	pub matched_intents: usize,
	pub orphan_deposits: usize,
	pub already_processed: usize,
}

/// Applies confirmed chain events for one vault to the ledger.
pub struct ReconciliationEngine {
	ledger: Arc<dyn LedgerStore>,
	registry: Arc<IntentRegistry>,
	epochs: Arc<EpochTracker>,
}

impl ReconciliationEngine {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		registry: Arc<IntentRegistry>,
		epochs: Arc<EpochTracker>,
	) -> Self {
		Self {
			ledger,
			registry,
			epochs,
		}
	}

	/// Processes one batch of confirmed events for `unit`'s vault.
	///
	/// The batch is sorted by (block, log index) before anything is written,
	/// so callers never have to care about provider log ordering. If any
	/// write fails the cursor must not advance; the caller retries the whole
	/// batch and idempotency absorbs the rows already written.
	pub async fn process_batch(
		&self,
		unit: &VaultContext,
		mut events: Vec<ChainEvent>,
	) -> Result<BatchOutcome, IndexerError> {
		events.sort();

		// Epoch counters can advance between polls; re-read them once per
		// batch so rows are stamped with the counters in effect now.
		if !events.is_empty() {
			self.epochs.refresh(unit.vault.address).await?;
		}

		let mut outcome = BatchOutcome::default();
		for event in &events {
			match &event.event {
				VaultEvent::Deposit {
					owner,
					assets,
					shares,
					..
				} => {
					self.apply_deposit(unit, event, *owner, *assets, *shares, &mut outcome)
						.await?;
				}
				VaultEvent::Withdraw {
					receiver,
					assets,
					shares,
					..
				} => {
					self.apply_withdrawal(unit, event, *receiver, *assets, *shares, &mut outcome)
						.await?;
				}
			}
		}

		if outcome != BatchOutcome::default() {
			info!(
				vault = %unit.vault.address,
				chain = %unit.chain.key,
				deposits = outcome.deposits,
				withdrawals = outcome.withdrawals,
				matched = outcome.matched_intents,
				orphans = outcome.orphan_deposits,
				redelivered = outcome.already_processed,
				"batch reconciled"
			);
		}
		Ok(outcome)
	}

	async fn apply_deposit(
		&self,
		unit: &VaultContext,
		event: &ChainEvent,
		owner: Address,
		assets: indexer_types::Amount,
		shares: indexer_types::Amount,
		outcome: &mut BatchOutcome,
	) -> Result<(), IndexerError> {
		// Redelivery check first, before any intent state is touched: a
		// confirmed row is final and must not match a second intent.
		if let Some(existing) = self.storage(self.ledger.get_deposit(&event.transaction_hash).await)?
		{
			if existing.status == DepositStatus::Confirmed {
				// A crash between the row upsert and the intent transition
				// leaves the referenced intent pending; finish it here so
				// replay converges on the committed state.
				if let Some(hash) = existing.intent_hash {
					let intent = self.storage(self.ledger.get_intent(&hash).await)?;
					if intent.map_or(false, |i| i.status == IntentStatus::Pending) {
						self.registry
							.mark_executed(&hash, event.block_timestamp)
							.await?;
						outcome.matched_intents += 1;
					}
				}
				debug!(
					tx = %event.transaction_hash,
					"deposit already confirmed, skipping redelivery"
				);
				outcome.already_processed += 1;
				return Ok(());
			}
		}

		let matched = self
			.registry
			.lookup(&owner, &unit.vault.address, &assets)
			.await?;
		let intent_hash = match &matched {
			Some(intent) => Some(intent.intent_hash),
			None => {
				warn!(
					vault = %unit.vault.address,
					user = %owner,
					amount = %assets,
					tx = %event.transaction_hash,
					"deposit without matching intent, recording as orphan"
				);
				None
			}
		};

		let epochs = self.epochs.current(unit.vault.address).await?;
		let row = Deposit {
			intent_hash,
			user_address: owner,
			vault_address: unit.vault.address,
			amount: assets,
			shares: Some(shares),
			epoch_id: Some(epochs.deposit_epoch_id),
			status: DepositStatus::Confirmed,
			block_number: event.block_number,
			transaction_hash: event.transaction_hash,
			created_at: event.block_timestamp,
		};

		match self.storage(self.ledger.upsert_deposit(&row).await)? {
			UpsertOutcome::AlreadyProcessed => {
				outcome.already_processed += 1;
				return Ok(());
			}
			UpsertOutcome::Inserted | UpsertOutcome::Updated => {}
		}

		if let Some(intent) = matched {
			self.registry
				.mark_executed(&intent.intent_hash, event.block_timestamp)
				.await?;
			outcome.matched_intents += 1;
		} else {
			outcome.orphan_deposits += 1;
		}
		outcome.deposits += 1;
		Ok(())
	}

	async fn apply_withdrawal(
		&self,
		unit: &VaultContext,
		event: &ChainEvent,
		receiver: Address,
		assets: indexer_types::Amount,
		shares: indexer_types::Amount,
		outcome: &mut BatchOutcome,
	) -> Result<(), IndexerError> {
		let epochs = self.epochs.current(unit.vault.address).await?;
		let row = Withdrawal {
			user_address: receiver,
			vault_address: unit.vault.address,
			shares,
			assets: Some(assets),
			epoch_id: Some(epochs.redeem_epoch_id),
			status: WithdrawalStatus::Confirmed,
			block_number: event.block_number,
			transaction_hash: event.transaction_hash,
			created_at: event.block_timestamp,
		};

		match self.storage(self.ledger.upsert_withdrawal(&row).await)? {
			UpsertOutcome::AlreadyProcessed => {
				debug!(
					tx = %event.transaction_hash,
					"withdrawal already confirmed, skipping redelivery"
				);
				outcome.already_processed += 1;
			}
			UpsertOutcome::Inserted | UpsertOutcome::Updated => {
				outcome.withdrawals += 1;
			}
		}
		Ok(())
	}

	fn storage<T>(&self, result: Result<T, StorageError>) -> Result<T, IndexerError> {
		result.map_err(|e| IndexerError::Storage(e.to_string()))
	}
}
