//! Decoding of raw vault logs into typed events.
//!
//! The vault contract emits ERC-4626 style events. Logs whose topic0 does
//! not match either signature are ignored rather than rejected, so unrelated
//! events on the same contract never stall a batch.

use crate::ChainError;
use alloy::sol;
use alloy::sol_types::SolEvent;
use indexer_types::common::{Log, B256};
use indexer_types::{Amount, ChainEvent, VaultEvent};
use chrono::{DateTime, Utc};

sol! {
	event Deposit(address indexed sender, address indexed owner, uint256 assets, uint256 shares);
	event Withdraw(
		address indexed sender,
		address indexed receiver,
		address indexed owner,
		uint256 assets,
		uint256 shares
	);
}

/// Topic0 signatures the watcher subscribes to.
pub fn event_signatures() -> Vec<B256> {
	vec![Deposit::SIGNATURE_HASH, Withdraw::SIGNATURE_HASH]
}

/// Decodes a raw log into a [`VaultEvent`], or `None` for foreign topics.
pub fn decode_vault_log(log: &Log) -> Result<Option<VaultEvent>, ChainError> {
	let Some(topic0) = log.topics.first() else {
		return Ok(None);
	};

	if *topic0 == Deposit::SIGNATURE_HASH {
		let event = Deposit::decode_raw_log(log.topics.iter().copied(), &log.data)
			.map_err(|e| ChainError::Decode(format!("deposit log: {e}")))?;
		return Ok(Some(VaultEvent::Deposit {
			sender: event.sender,
			owner: event.owner,
			assets: Amount::from(event.assets),
			shares: Amount::from(event.shares),
		}));
	}

	if *topic0 == Withdraw::SIGNATURE_HASH {
		let event = Withdraw::decode_raw_log(log.topics.iter().copied(), &log.data)
			.map_err(|e| ChainError::Decode(format!("withdraw log: {e}")))?;
		return Ok(Some(VaultEvent::Withdraw {
			sender: event.sender,
			receiver: event.receiver,
			owner: event.owner,
			assets: Amount::from(event.assets),
			shares: Amount::from(event.shares),
		}));
	}

	Ok(None)
}

/// Pairs a decoded event with its chain position.
pub fn to_chain_event(
	log: &Log,
	event: VaultEvent,
	block_timestamp: DateTime<Utc>,
) -> ChainEvent {
	ChainEvent {
		block_number: log.block_number,
		log_index: log.log_index,
		transaction_hash: log.transaction_hash,
		block_timestamp,
		event,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, U256};
	use alloy::sol_types::SolEvent;

	fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
		Log {
			address: Address::from([7u8; 20]),
			topics,
			data,
			block_number: 100,
			transaction_hash: B256::from([1u8; 32]),
			log_index: 0,
		}
	}

	#[test]
	fn test_decodes_deposit() {
		let sender = Address::from([1u8; 20]);
		let owner = Address::from([2u8; 20]);
		let event = Deposit {
			sender,
			owner,
			assets: U256::from(1_000_000_000u64),
			shares: U256::from(999_000_000u64),
		};
		let data = event.encode_data();
		let topics = vec![
			Deposit::SIGNATURE_HASH,
			sender.into_word(),
			owner.into_word(),
		];

		let decoded = decode_vault_log(&raw_log(topics, data)).unwrap().unwrap();
		match decoded {
			VaultEvent::Deposit {
				sender: s,
				owner: o,
				assets,
				shares,
			} => {
				assert_eq!(s, sender);
				assert_eq!(o, owner);
				assert_eq!(assets.to_string(), "1000000000");
				assert_eq!(shares.to_string(), "999000000");
			}
			other => panic!("expected deposit, got {other:?}"),
		}
	}

	#[test]
	fn test_decodes_withdraw() {
		let sender = Address::from([1u8; 20]);
		let receiver = Address::from([2u8; 20]);
		let owner = Address::from([3u8; 20]);
		let event = Withdraw {
			sender,
			receiver,
			owner,
			assets: U256::from(200_000_000u64),
			shares: U256::from(190_000_000u64),
		};
		let data = event.encode_data();
		let topics = vec![
			Withdraw::SIGNATURE_HASH,
			sender.into_word(),
			receiver.into_word(),
			owner.into_word(),
		];

		let decoded = decode_vault_log(&raw_log(topics, data)).unwrap().unwrap();
		assert!(matches!(decoded, VaultEvent::Withdraw { .. }));
	}

	#[test]
	fn test_ignores_foreign_topic() {
		let log = raw_log(vec![B256::from([0xau8; 32])], vec![]);
		assert!(decode_vault_log(&log).unwrap().is_none());
	}
}
