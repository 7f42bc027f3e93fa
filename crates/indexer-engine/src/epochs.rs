//! Per-vault epoch tracking.
//!
//! Vaults batch deposits and redemptions into epochs advanced by the
//! contract itself. The tracker reads the current epoch counters with view
//! calls and caches them per vault; the reconciliation engine stamps every
//! confirmed row with the epoch it landed in.
//!
//! Epoch counters only ever move forward on chain. A lower value from an RPC
//! node (a lagging replica, or a node answering from a stale fork) is clamped
//! to the cached value and logged rather than trusted.

use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use indexer_chains::{ChainAdapter, ChainError};
use indexer_types::common::Address;
use indexer_types::IndexerError;
use std::sync::Arc;
use tracing::{debug, warn};

sol! {
	function depositEpoch() external view returns (uint256);
	function redeemEpoch() external view returns (uint256);
}

/// Current epoch counters for one vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultEpochs {
	pub deposit_epoch_id: u64,
	pub redeem_epoch_id: u64,
}

/// Reads and caches epoch counters for the vaults on one chain.
pub struct EpochTracker {
	adapter: Arc<dyn ChainAdapter>,
	cache: DashMap<Address, VaultEpochs>,
}

impl EpochTracker {
	pub fn new(adapter: Arc<dyn ChainAdapter>) -> Self {
		Self {
			adapter,
			cache: DashMap::new(),
		}
	}

	/// Cached epochs for `vault`, fetching on first use.
	pub async fn current(&self, vault: Address) -> Result<VaultEpochs, IndexerError> {
		if let Some(cached) = self.cache.get(&vault) {
			return Ok(*cached);
		}
		self.refresh(vault).await
	}

	/// Re-reads both counters from the chain and updates the cache,
	/// clamping regressions to the cached value.
	pub async fn refresh(&self, vault: Address) -> Result<VaultEpochs, IndexerError> {
		let deposit_epoch_id = self.read_counter(vault, depositEpochCall {}).await?;
		let redeem_epoch_id = self.read_counter(vault, redeemEpochCall {}).await?;
		let fetched = VaultEpochs {
			deposit_epoch_id,
			redeem_epoch_id,
		};

		let mut entry = self.cache.entry(vault).or_insert(fetched);
		if fetched.deposit_epoch_id < entry.deposit_epoch_id
			|| fetched.redeem_epoch_id < entry.redeem_epoch_id
		{
			warn!(
				vault = %vault,
				cached_deposit = entry.deposit_epoch_id,
				cached_redeem = entry.redeem_epoch_id,
				fetched_deposit = fetched.deposit_epoch_id,
				fetched_redeem = fetched.redeem_epoch_id,
				"epoch counter regressed on chain read, keeping cached value"
			);
		} else {
			*entry = fetched;
		}
		let current = *entry;
		debug!(
			vault = %vault,
			deposit_epoch = current.deposit_epoch_id,
			redeem_epoch = current.redeem_epoch_id,
			"epoch counters refreshed"
		);
		Ok(current)
	}

	pub async fn current_deposit_epoch(&self, vault: Address) -> Result<u64, IndexerError> {
		Ok(self.current(vault).await?.deposit_epoch_id)
	}

	pub async fn current_redeem_epoch(&self, vault: Address) -> Result<u64, IndexerError> {
		Ok(self.current(vault).await?.redeem_epoch_id)
	}

	/// Drops the cached counters for `vault`, forcing a chain read on the
	/// next access. Called after a reorg rollback.
	pub fn invalidate(&self, vault: &Address) {
		self.cache.remove(vault);
	}

	async fn read_counter<C>(&self, vault: Address, call: C) -> Result<u64, IndexerError>
	where
		C: SolCall<Return = U256>,
	{
		let ret = self
			.adapter
			.call(vault, call.abi_encode())
			.await
			.map_err(map_chain_error)?;
		let value = C::abi_decode_returns(&ret)
			.map_err(|e| IndexerError::TransientChain(format!("epoch counter decode: {e}")))?;
		Ok(value.to::<u64>())
	}
}

fn map_chain_error(e: ChainError) -> IndexerError {
	IndexerError::TransientChain(e.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::U256;
	use alloy::sol_types::SolValue;
	use async_trait::async_trait;
	use indexer_types::common::{BlockNumber, Log, B256};
	use indexer_types::ChainId;
	use std::sync::Mutex;

	/// Scripted adapter: answers epoch view calls from a queue of
	/// (deposit, redeem) pairs, one pair per refresh.
	struct ScriptedEpochs {
		responses: Mutex<Vec<(u64, u64)>>,
		pending_redeem: Mutex<Option<u64>>,
	}

	impl ScriptedEpochs {
		fn new(mut responses: Vec<(u64, u64)>) -> Self {
			responses.reverse();
			Self {
				responses: Mutex::new(responses),
				pending_redeem: Mutex::new(None),
			}
		}
	}

	#[async_trait]
	impl ChainAdapter for ScriptedEpochs {
		fn chain_id(&self) -> ChainId {
			ChainId(1)
		}

		async fn block_number(&self) -> Result<BlockNumber, ChainError> {
			Ok(0)
		}

		async fn block_hash(&self, _block: BlockNumber) -> Result<Option<B256>, ChainError> {
			Ok(None)
		}

		async fn block_timestamp(&self, _block: BlockNumber) -> Result<u64, ChainError> {
			Ok(0)
		}

		async fn get_logs(
			&self,
			_address: Address,
			_topics: &[B256],
			_from_block: BlockNumber,
			_to_block: BlockNumber,
		) -> Result<Vec<Log>, ChainError> {
			Ok(vec![])
		}

		async fn call(&self, _to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
			let value = if data == (depositEpochCall {}).abi_encode() {
				let (deposit, redeem) = self
					.responses
					.lock()
					.unwrap()
					.pop()
					.expect("unscripted epoch call");
				*self.pending_redeem.lock().unwrap() = Some(redeem);
				deposit
			} else {
				self.pending_redeem
					.lock()
					.unwrap()
					.take()
					.expect("redeem read before deposit read")
			};
			Ok(U256::from(value).abi_encode())
		}
	}

	#[tokio::test]
	async fn test_reads_and_caches_counters() {
		let adapter = Arc::new(ScriptedEpochs::new(vec![(3, 2)]));
		let tracker = EpochTracker::new(adapter);
		let vault = Address::from([1u8; 20]);

		let epochs = tracker.current(vault).await.unwrap();
		assert_eq!(epochs.deposit_epoch_id, 3);
		assert_eq!(epochs.redeem_epoch_id, 2);

		// Second access is served from cache; the script has no more
		// responses, so a chain read would panic.
		let cached = tracker.current(vault).await.unwrap();
		assert_eq!(cached, epochs);
	}

	#[tokio::test]
	async fn test_clamps_regressing_counters() {
		let adapter = Arc::new(ScriptedEpochs::new(vec![(5, 4), (3, 4), (6, 5)]));
		let tracker = EpochTracker::new(adapter);
		let vault = Address::from([1u8; 20]);

		assert_eq!(
			tracker.refresh(vault).await.unwrap(),
			VaultEpochs {
				deposit_epoch_id: 5,
				redeem_epoch_id: 4
			}
		);

		// A stale node reports deposit epoch 3; the cached 5 wins.
		assert_eq!(
			tracker.refresh(vault).await.unwrap(),
			VaultEpochs {
				deposit_epoch_id: 5,
				redeem_epoch_id: 4
			}
		);

		// Forward movement is accepted.
		assert_eq!(
			tracker.refresh(vault).await.unwrap(),
			VaultEpochs {
				deposit_epoch_id: 6,
				redeem_epoch_id: 5
			}
		);
	}

	#[tokio::test]
	async fn test_invalidate_forces_chain_read() {
		let adapter = Arc::new(ScriptedEpochs::new(vec![(1, 1), (2, 2)]));
		let tracker = EpochTracker::new(adapter);
		let vault = Address::from([1u8; 20]);

		assert_eq!(tracker.current(vault).await.unwrap().deposit_epoch_id, 1);
		tracker.invalidate(&vault);
		assert_eq!(tracker.current(vault).await.unwrap().deposit_epoch_id, 2);
	}
}
