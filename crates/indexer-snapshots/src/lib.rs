//! Daily ledger snapshots per vault.
//!
//! A snapshot is the append-only daily record of one vault: on-chain totals
//! read from the contract, flow deltas summed from confirmed ledger rows, and
//! the epoch counters at build time. Builds are deterministic over an
//! unchanged ledger and idempotent through the unique (`date`, `vault`)
//! index; rebuilding an existing day returns the stored row untouched.

use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::SolCall;
use chrono::{NaiveDate, Utc};
use indexer_chains::{ChainAdapter, ChainError};
use indexer_engine::EpochTracker;
use indexer_storage::{LedgerStore, StorageError};
use indexer_types::common::Address;
use indexer_types::{Amount, IndexerError, Snapshot};
use std::sync::Arc;
use tracing::{debug, info};

pub mod schedule;

pub use schedule::{next_run, run_daily};

sol! {
	function totalAssets() external view returns (uint256);
	function totalSupply() external view returns (uint256);
}

/// Builds daily snapshots for the vaults on one chain.
pub struct SnapshotBuilder {
	ledger: Arc<dyn LedgerStore>,
	adapter: Arc<dyn ChainAdapter>,
	epochs: Arc<EpochTracker>,
}

impl SnapshotBuilder {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		adapter: Arc<dyn ChainAdapter>,
		epochs: Arc<EpochTracker>,
	) -> Self {
		Self {
			ledger,
			adapter,
			epochs,
		}
	}

	/// Builds the snapshot of `vault` for `date`, or returns the stored row
	/// if that day was already built.
	///
	/// Flow deltas cover confirmed rows with `created_at` in
	/// (prior snapshot `created_at`, end of `date`]. With no prior snapshot
	/// the window is open at the left, so the first build absorbs all
	/// history.
	pub async fn build_snapshot(
		&self,
		vault: Address,
		date: NaiveDate,
	) -> Result<Snapshot, IndexerError> {
		if let Some(existing) = self.storage(self.ledger.get_snapshot(&vault, date).await)? {
			debug!(vault = %vault, %date, "snapshot already built");
			return Ok(existing);
		}

		let after = self
			.storage(self.ledger.latest_snapshot_before(&vault, date).await)?
			.map(|prior| prior.created_at);
		let until = date
			.and_hms_nano_opt(23, 59, 59, 999_999_999)
			.map(|t| t.and_utc())
			.ok_or_else(|| IndexerError::Storage(format!("invalid snapshot date {date}")))?;

		let deposits = self.storage(
			self.ledger
				.confirmed_deposits_between(&vault, after, until)
				.await,
		)?;
		let withdrawals = self.storage(
			self.ledger
				.confirmed_withdrawals_between(&vault, after, until)
				.await,
		)?;
		let total_deposits = sum_amounts(deposits.iter().map(|d| d.amount))?;
		// Unsettled withdrawals carry no asset amount yet and are not
		// counted; the engine only writes settled rows.
		let total_withdrawals = sum_amounts(withdrawals.iter().filter_map(|w| w.assets))?;

		let total_assets = self.read_total(vault, totalAssetsCall {}).await?;
		let total_supply = self.read_total(vault, totalSupplyCall {}).await?;
		let epochs = self.epochs.refresh(vault).await?;

		let snapshot = Snapshot {
			date,
			vault_address: vault,
			total_assets,
			total_supply,
			total_deposits,
			total_withdrawals,
			deposit_epoch_id: epochs.deposit_epoch_id,
			redeem_epoch_id: epochs.redeem_epoch_id,
			created_at: Utc::now(),
		};

		match self.ledger.insert_snapshot(&snapshot).await {
			Ok(()) => {
				info!(
					vault = %vault,
					%date,
					total_assets = %snapshot.total_assets,
					total_supply = %snapshot.total_supply,
					deposits = %snapshot.total_deposits,
					withdrawals = %snapshot.total_withdrawals,
					"snapshot built"
				);
				Ok(snapshot)
			}
			// A concurrent build won the unique index; theirs is canonical.
			Err(StorageError::Conflict(_)) => {
				let stored = self.storage(self.ledger.get_snapshot(&vault, date).await)?;
				stored.ok_or_else(|| {
					IndexerError::Storage(format!("snapshot {vault}/{date} vanished after conflict"))
				})
			}
			Err(e) => Err(IndexerError::Storage(e.to_string())),
		}
	}

	/// Builds every missing day for `vault` up to and including `through`,
	/// oldest first.
	pub async fn backfill(
		&self,
		vault: Address,
		through: NaiveDate,
	) -> Result<usize, IndexerError> {
		let next = date_after(
			self.storage(
				self.ledger
					.latest_snapshot_before(&vault, through.succ_opt().unwrap_or(through))
					.await,
			)?
			.map(|s| s.date),
		);

		let mut built = 0;
		let mut day = next.unwrap_or(through);
		while day <= through {
			self.build_snapshot(vault, day).await?;
			built += 1;
			day = match day.succ_opt() {
				Some(d) => d,
				None => break,
			};
		}
		if built > 1 {
			info!(vault = %vault, days = built, "backfilled missed snapshots");
		}
		Ok(built)
	}

	async fn read_total<C>(&self, vault: Address, call: C) -> Result<Amount, IndexerError>
	where
		C: SolCall<Return = U256>,
	{
		let ret = self
			.adapter
			.call(vault, call.abi_encode())
			.await
			.map_err(map_chain_error)?;
		let value = C::abi_decode_returns(&ret)
			.map_err(|e| IndexerError::TransientChain(format!("vault total decode: {e}")))?;
		Ok(Amount::from(value))
	}

	fn storage<T>(&self, result: Result<T, StorageError>) -> Result<T, IndexerError> {
		result.map_err(|e| IndexerError::Storage(e.to_string()))
	}
}

fn sum_amounts(amounts: impl Iterator<Item = Amount>) -> Result<Amount, IndexerError> {
	let mut total = Amount::ZERO;
	for amount in amounts {
		total = total
			.checked_add(amount)
			.ok_or_else(|| IndexerError::Storage("amount overflow summing flows".to_string()))?;
	}
	Ok(total)
}

fn date_after(latest: Option<NaiveDate>) -> Option<NaiveDate> {
	latest.and_then(|d| d.succ_opt())
}

fn map_chain_error(e: ChainError) -> IndexerError {
	IndexerError::TransientChain(e.to_string())
}
