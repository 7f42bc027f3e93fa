//! Decoded vault events.
//!
//! Chain adapters decode raw logs into an explicit tagged variant with a
//! fixed field contract per variant; nothing downstream ever inspects raw
//! topics or data.

use crate::amount::Amount;
use crate::common::{Address, BlockNumber, LogIndex, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Event kind discriminant, used for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
	Deposit,
	Withdraw,
}

/// A decoded vault contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
	/// Assets moved into the vault, shares minted to `owner`.
	Deposit {
		sender: Address,
		owner: Address,
		assets: Amount,
		shares: Amount,
	},
	/// Shares burned from `owner`, assets released to `receiver`.
	Withdraw {
		sender: Address,
		receiver: Address,
		owner: Address,
		assets: Amount,
		shares: Amount,
	},
}

impl VaultEvent {
	pub const fn kind(&self) -> EventKind {
		match self {
			Self::Deposit { .. } => EventKind::Deposit,
			Self::Withdraw { .. } => EventKind::Withdraw,
		}
	}
}

/// A decoded event with its chain position.
///
/// Ordering is total and strict: first by block number, then by log index
/// within the block. The reconciliation engine relies on batches arriving in
/// this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
	pub block_number: BlockNumber,
	pub log_index: LogIndex,
	pub transaction_hash: B256,
	pub block_timestamp: DateTime<Utc>,
	pub event: VaultEvent,
}

impl Ord for ChainEvent {
	fn cmp(&self, other: &Self) -> Ordering {
		(self.block_number, self.log_index).cmp(&(other.block_number, other.log_index))
	}
}

impl PartialOrd for ChainEvent {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn event_at(block: BlockNumber, index: LogIndex) -> ChainEvent {
		ChainEvent {
			block_number: block,
			log_index: index,
			transaction_hash: B256::ZERO,
			block_timestamp: Utc::now(),
			event: VaultEvent::Deposit {
				sender: Address::ZERO,
				owner: Address::ZERO,
				assets: Amount::ZERO,
				shares: Amount::ZERO,
			},
		}
	}

	#[test]
	fn test_strict_ordering() {
		let mut events = vec![event_at(101, 0), event_at(100, 7), event_at(100, 2)];
		events.sort();
		let positions: Vec<_> = events
			.iter()
			.map(|e| (e.block_number, e.log_index))
			.collect();
		assert_eq!(positions, vec![(100, 2), (100, 7), (101, 0)]);
	}
}
