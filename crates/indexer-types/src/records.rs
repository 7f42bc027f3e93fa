//! Persisted ledger records.
//!
//! These are the rows of the four ledger collections (`deposit_intents`,
//! `deposits`, `withdrawals`, `snapshots`) plus the per-chain cursor record.
//! Records are append-or-update only; nothing is ever deleted.

use crate::amount::Amount;
use crate::common::{Address, BlockNumber, ChainKey, B256};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a signed deposit intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
	Pending,
	Executed,
	Expired,
	Cancelled,
}

impl IntentStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Executed => "executed",
			Self::Expired => "expired",
			Self::Cancelled => "cancelled",
		}
	}
}

impl fmt::Display for IntentStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A user-signed promise to deposit into a vault.
///
/// `intent_hash` is the EIP-712 signing hash of the canonical payload and is
/// globally unique. `nonce` is strictly increasing per (user, vault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
	pub intent_hash: B256,
	pub user_address: Address,
	pub vault_address: Address,
	pub asset_address: Address,
	pub amount: Amount,
	pub nonce: u64,
	pub status: IntentStatus,
	pub created_at: DateTime<Utc>,
	pub executed_at: Option<DateTime<Utc>>,
}

/// Status of an observed on-chain deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
	Pending,
	Confirmed,
	Failed,
}

impl DepositStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Confirmed => "confirmed",
			Self::Failed => "failed",
		}
	}
}

/// A confirmed or pending on-chain deposit.
///
/// `transaction_hash` is the idempotent upsert key: unique among confirmed
/// rows. `intent_hash` is `None` for direct deposits made without a prior
/// signed intent (orphans). `shares` is set only once the mint is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
	pub intent_hash: Option<B256>,
	pub user_address: Address,
	pub vault_address: Address,
	pub amount: Amount,
	pub shares: Option<Amount>,
	pub epoch_id: Option<u64>,
	pub status: DepositStatus,
	pub block_number: BlockNumber,
	pub transaction_hash: B256,
	pub created_at: DateTime<Utc>,
}

/// Status of an observed on-chain withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
	Pending,
	Confirmed,
	Failed,
}

impl WithdrawalStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Confirmed => "confirmed",
			Self::Failed => "failed",
		}
	}
}

/// An on-chain withdrawal. Keyed by burned `shares`; `assets` stays `None`
/// until settlement. Withdrawals carry no intent reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
	pub user_address: Address,
	pub vault_address: Address,
	pub shares: Amount,
	pub assets: Option<Amount>,
	pub epoch_id: Option<u64>,
	pub status: WithdrawalStatus,
	pub block_number: BlockNumber,
	pub transaction_hash: B256,
	pub created_at: DateTime<Utc>,
}

/// Append-only daily ledger state per vault, unique on (`date`, `vault_address`).
///
/// `total_deposits` / `total_withdrawals` are deltas since the prior
/// snapshot. Recomputation for the same key is deterministic and idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
	pub date: NaiveDate,
	pub vault_address: Address,
	pub total_assets: Amount,
	pub total_supply: Amount,
	pub total_deposits: Amount,
	pub total_withdrawals: Amount,
	pub deposit_epoch_id: u64,
	pub redeem_epoch_id: u64,
	pub created_at: DateTime<Utc>,
}

/// Last-processed block pointer for one unit of work, keyed by a
/// chain-scoped name. Monotonically non-decreasing except for an explicit,
/// logged reorg rollback.
///
/// `recent_hashes` is a bounded window of (block, hash) pairs recorded at
/// each advance; it is what reorg recovery walks to find the deepest block
/// whose hash still matches the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
	pub chain_key: ChainKey,
	pub last_block: BlockNumber,
	pub last_hash: B256,
	pub recent_hashes: Vec<(BlockNumber, B256)>,
	pub updated_at: DateTime<Utc>,
}

impl Cursor {
	/// Hash recorded for `block`, if still inside the window.
	pub fn recorded_hash(&self, block: BlockNumber) -> Option<B256> {
		self.recent_hashes
			.iter()
			.find(|(b, _)| *b == block)
			.map(|(_, h)| *h)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_round_trip() {
		let json = serde_json::to_string(&IntentStatus::Pending).unwrap();
		assert_eq!(json, "\"pending\"");
		let back: IntentStatus = serde_json::from_str(&json).unwrap();
		assert_eq!(back, IntentStatus::Pending);
		assert_eq!(DepositStatus::Confirmed.as_str(), "confirmed");
	}

	#[test]
	fn test_cursor_recorded_hash() {
		let cursor = Cursor {
			chain_key: "ethereum:0x0".to_string(),
			last_block: 498,
			last_hash: B256::from([2u8; 32]),
			recent_hashes: vec![
				(497, B256::from([1u8; 32])),
				(498, B256::from([2u8; 32])),
			],
			updated_at: Utc::now(),
		};
		assert_eq!(cursor.recorded_hash(497), Some(B256::from([1u8; 32])));
		assert_eq!(cursor.recorded_hash(496), None);
	}
}
