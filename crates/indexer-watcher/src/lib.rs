//! Per-vault chain watcher.
//!
//! One [`WatcherUnit`] owns the poll loop for a single (chain, vault) pair:
//! it follows the head at the configured confirmation depth, fetches vault
//! logs in bounded spans, decodes and orders them, hands the batch to the
//! reconciliation engine, and only then advances the durable cursor. A crash
//! between reconciliation and cursor advance redelivers the batch, which the
//! idempotent upserts absorb.
//!
//! Reorg recovery: before each fetch the watcher re-verifies the hash of the
//! cursor block against the chain. On a mismatch it walks the cursor's
//! recent-hash window from the newest entry down to the deepest block whose
//! hash still matches, rolls the cursor back there, and lets the next poll
//! re-fetch forward.

use chrono::{DateTime, Utc};
use indexer_chains::decode::{decode_vault_log, event_signatures, to_chain_event};
use indexer_chains::{ChainAdapter, ChainError};
use indexer_engine::{EpochTracker, ReconciliationEngine};
use indexer_storage::{CursorStore, StorageError};
use indexer_types::common::{BlockNumber, B256};
use indexer_types::{ChainEvent, Cursor, IndexerError, VaultContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// The poll loop for one (chain, vault) unit of work.
pub struct WatcherUnit {
	unit: VaultContext,
	adapter: Arc<dyn ChainAdapter>,
	engine: Arc<ReconciliationEngine>,
	epochs: Arc<EpochTracker>,
	cursor: CursorStore,
}

impl WatcherUnit {
	pub fn new(
		unit: VaultContext,
		adapter: Arc<dyn ChainAdapter>,
		engine: Arc<ReconciliationEngine>,
		epochs: Arc<EpochTracker>,
		cursor: CursorStore,
	) -> Self {
		Self {
			unit,
			adapter,
			engine,
			epochs,
			cursor,
		}
	}

	/// Runs until shutdown is signalled or a fatal configuration error is
	/// hit. Transient chain and storage errors are logged and retried on the
	/// next poll; they never take the unit down.
	pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexerError> {
		self.initialize().await?;
		info!(
			chain = %self.unit.chain.key,
			vault = %self.unit.vault.address,
			start_block = self.unit.vault.start_block,
			"watcher unit started"
		);

		let interval = Duration::from_secs(self.unit.chain.poll_interval_secs);
		loop {
			match self.poll_once().await {
				Ok(()) => {}
				Err(e @ IndexerError::FatalConfig { .. }) => {
					error!(
						chain = %self.unit.chain.key,
						vault = %self.unit.vault.address,
						error = %e,
						"watcher unit stopping on fatal configuration error"
					);
					return Err(e);
				}
				Err(e) => {
					warn!(
						chain = %self.unit.chain.key,
						vault = %self.unit.vault.address,
						error = %e,
						"poll failed, retrying next cycle"
					);
				}
			}

			// The batch above ran to completion before we get here, so a
			// shutdown never interrupts an in-flight write.
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						info!(
							chain = %self.unit.chain.key,
							vault = %self.unit.vault.address,
							"watcher unit stopping"
						);
						return Ok(());
					}
				}
			}
		}
	}

	async fn initialize(&self) -> Result<(), IndexerError> {
		let init_block = self.unit.vault.start_block.saturating_sub(1);
		let hash = self
			.adapter
			.block_hash(init_block)
			.await
			.map_err(map_chain_error)?
			.unwrap_or(B256::ZERO);
		self.storage(self.cursor.initialize_if_absent(init_block, hash).await)?;
		Ok(())
	}

	/// One poll cycle: reorg check, bounded fetch, reconcile, advance.
	pub async fn poll_once(&self) -> Result<(), IndexerError> {
		let cursor = self
			.storage(self.cursor.get().await)?
			.ok_or_else(|| IndexerError::Storage("cursor missing after initialization".into()))?;

		if self.reorged(&cursor).await? {
			self.recover(&cursor).await?;
			return Ok(());
		}

		let head = self.adapter.block_number().await.map_err(map_chain_error)?;
		let target = head.saturating_sub(self.unit.chain.confirmation_depth);
		if target <= cursor.last_block {
			return Ok(());
		}

		let from = cursor.last_block + 1;
		let to = target.min(cursor.last_block + self.unit.chain.max_block_span);

		let logs = self
			.adapter
			.get_logs(self.unit.vault.address, &event_signatures(), from, to)
			.await
			.map_err(map_chain_error)?;

		let mut events = Vec::with_capacity(logs.len());
		let mut timestamps: HashMap<BlockNumber, DateTime<Utc>> = HashMap::new();
		for log in &logs {
			let Some(event) = decode_vault_log(log).map_err(map_chain_error)? else {
				continue;
			};
			debug!(
				kind = ?event.kind(),
				block = log.block_number,
				tx = %log.transaction_hash,
				"decoded vault event"
			);
			let timestamp = match timestamps.get(&log.block_number) {
				Some(t) => *t,
				None => {
					let t = self.block_time(log.block_number).await?;
					timestamps.insert(log.block_number, t);
					t
				}
			};
			events.push(to_chain_event(log, event, timestamp));
		}
		events.sort();

		let batch_len = events.len();
		self.process(events).await?;

		let to_hash = self
			.adapter
			.block_hash(to)
			.await
			.map_err(map_chain_error)?
			.ok_or_else(|| {
				IndexerError::TransientChain(format!("block {to} vanished before cursor advance"))
			})?;
		self.storage(
			self.cursor
				.advance(Some(cursor.last_block), to, to_hash, &[])
				.await,
		)?;

		debug!(
			chain = %self.unit.chain.key,
			vault = %self.unit.vault.address,
			from,
			to,
			events = batch_len,
			"poll cycle complete"
		);
		Ok(())
	}

	async fn process(&self, events: Vec<ChainEvent>) -> Result<(), IndexerError> {
		if events.is_empty() {
			return Ok(());
		}
		self.engine.process_batch(&self.unit, events).await?;
		Ok(())
	}

	/// True if the chain no longer agrees with the cursor block's hash.
	async fn reorged(&self, cursor: &Cursor) -> Result<bool, IndexerError> {
		if cursor.last_hash == B256::ZERO {
			// Pre-genesis placeholder written at initialization.
			return Ok(false);
		}
		let chain_hash = self
			.adapter
			.block_hash(cursor.last_block)
			.await
			.map_err(map_chain_error)?;
		Ok(chain_hash != Some(cursor.last_hash))
	}

	/// Rolls the cursor back to the deepest recorded block whose hash still
	/// matches the chain. Epoch caches are dropped since the counters may
	/// have moved on the new fork.
	async fn recover(&self, cursor: &Cursor) -> Result<(), IndexerError> {
		warn!(
			chain = %self.unit.chain.key,
			vault = %self.unit.vault.address,
			block = cursor.last_block,
			"reorg detected at cursor block"
		);

		for (block, stored_hash) in cursor.recent_hashes.iter().rev() {
			if *block >= cursor.last_block {
				continue;
			}
			let chain_hash = self
				.adapter
				.block_hash(*block)
				.await
				.map_err(map_chain_error)?;
			if chain_hash == Some(*stored_hash) {
				self.storage(self.cursor.rollback(*block).await)?;
				self.epochs.invalidate(&self.unit.vault.address);
				return Ok(());
			}
		}

		// Deeper than the recorded window; wait for the chain to settle
		// rather than guessing a resume point.
		Err(IndexerError::ReorgDetected {
			chain_key: self.unit.chain.key.clone(),
			block: cursor.last_block,
		})
	}

	async fn block_time(&self, block: BlockNumber) -> Result<DateTime<Utc>, IndexerError> {
		let secs = self
			.adapter
			.block_timestamp(block)
			.await
			.map_err(map_chain_error)?;
		DateTime::<Utc>::from_timestamp(secs as i64, 0)
			.ok_or_else(|| IndexerError::TransientChain(format!("invalid timestamp on block {block}")))
	}

	fn storage<T>(&self, result: Result<T, StorageError>) -> Result<T, IndexerError> {
		result.map_err(|e| IndexerError::Storage(e.to_string()))
	}
}

fn map_chain_error(e: ChainError) -> IndexerError {
	IndexerError::TransientChain(e.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, U256};
	use alloy::sol_types::{SolCall, SolEvent, SolValue};
	use chrono::Duration as ChronoDuration;
	use indexer_chains::decode::Deposit;
	use indexer_engine::epochs::depositEpochCall;
	use indexer_intents::IntentRegistry;
	use indexer_storage::{LedgerStore, MemoryLedger};
	use indexer_types::common::Log;
	use indexer_types::{ChainConfig, ChainId, DepositStatus, VaultConfig};
	use std::sync::Mutex;

	const CHAIN: ChainId = ChainId(1);

	fn vault_address() -> Address {
		Address::from([2u8; 20])
	}

	fn unit(confirmation_depth: u64, max_block_span: u64) -> VaultContext {
		VaultContext {
			vault: VaultConfig {
				chain_key: "ethereum".to_string(),
				address: vault_address(),
				asset_address: Address::from([3u8; 20]),
				asset_decimals: 6,
				start_block: 490,
			},
			chain: ChainConfig {
				key: "ethereum".to_string(),
				chain_id: CHAIN,
				rpc_endpoints: vec!["http://localhost:8545".to_string()],
				confirmation_depth,
				poll_interval_secs: 1,
				max_block_span,
				rpc_timeout_secs: 10,
			},
		}
	}

	fn block_hash(block: BlockNumber, fork: u8) -> B256 {
		let mut bytes = [fork; 32];
		bytes[..8].copy_from_slice(&block.to_be_bytes());
		B256::from(bytes)
	}

	fn deposit_log(owner: Address, amount: u64, block: BlockNumber, tx: u8) -> Log {
		let event = Deposit {
			sender: owner,
			owner,
			assets: U256::from(amount),
			shares: U256::from(amount),
		};
		Log {
			address: vault_address(),
			topics: vec![Deposit::SIGNATURE_HASH, owner.into_word(), owner.into_word()],
			data: event.encode_data(),
			block_number: block,
			transaction_hash: B256::from([tx; 32]),
			log_index: 0,
		}
	}

	#[derive(Default)]
	struct ChainState {
		head: BlockNumber,
		/// Fork id per block; hash derives from (block, fork).
		forks: HashMap<BlockNumber, u8>,
		logs: Vec<Log>,
	}

	/// Mutable scripted chain used to drive poll cycles.
	struct MockChain {
		state: Mutex<ChainState>,
	}

	impl MockChain {
		fn new(head: BlockNumber) -> Self {
			Self {
				state: Mutex::new(ChainState {
					head,
					..Default::default()
				}),
			}
		}

		fn set_head(&self, head: BlockNumber) {
			self.state.lock().unwrap().head = head;
		}

		fn set_fork(&self, block: BlockNumber, fork: u8) {
			self.state.lock().unwrap().forks.insert(block, fork);
		}

		fn push_log(&self, log: Log) {
			self.state.lock().unwrap().logs.push(log);
		}

		fn remove_logs_at(&self, block: BlockNumber) {
			self.state
				.lock()
				.unwrap()
				.logs
				.retain(|l| l.block_number != block);
		}
	}

	#[async_trait::async_trait]
	impl ChainAdapter for MockChain {
		fn chain_id(&self) -> ChainId {
			CHAIN
		}

		async fn block_number(&self) -> Result<BlockNumber, ChainError> {
			Ok(self.state.lock().unwrap().head)
		}

		async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>, ChainError> {
			let state = self.state.lock().unwrap();
			if block > state.head {
				return Ok(None);
			}
			let fork = state.forks.get(&block).copied().unwrap_or(0);
			Ok(Some(block_hash(block, fork)))
		}

		async fn block_timestamp(&self, block: BlockNumber) -> Result<u64, ChainError> {
			Ok(1_700_000_000 + block * 12)
		}

		async fn get_logs(
			&self,
			address: Address,
			_topics: &[B256],
			from_block: BlockNumber,
			to_block: BlockNumber,
		) -> Result<Vec<Log>, ChainError> {
			Ok(self
				.state
				.lock()
				.unwrap()
				.logs
				.iter()
				.filter(|l| {
					l.address == address
						&& l.block_number >= from_block
						&& l.block_number <= to_block
				})
				.cloned()
				.collect())
		}

		async fn call(&self, _to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
			// Epoch counters are constant in these tests.
			let value = if data == (depositEpochCall {}).abi_encode() {
				3u64
			} else {
				2u64
			};
			Ok(U256::from(value).abi_encode())
		}
	}

	struct Harness {
		chain: Arc<MockChain>,
		ledger: Arc<MemoryLedger>,
		watcher: WatcherUnit,
	}

	fn harness(head: BlockNumber, confirmation_depth: u64, max_block_span: u64) -> Harness {
		let chain = Arc::new(MockChain::new(head));
		let ledger = Arc::new(MemoryLedger::new());
		let unit = unit(confirmation_depth, max_block_span);

		let registry = Arc::new(IntentRegistry::new(
			ledger.clone(),
			std::collections::HashMap::from([(vault_address(), CHAIN)]),
			ChronoDuration::hours(24),
		));
		let epochs = Arc::new(EpochTracker::new(chain.clone()));
		let engine = Arc::new(ReconciliationEngine::new(
			ledger.clone(),
			registry,
			epochs.clone(),
		));
		let cursor = CursorStore::new(ledger.clone(), unit.cursor_key());
		let watcher = WatcherUnit::new(unit, chain.clone(), engine, epochs, cursor);
		Harness {
			chain,
			ledger,
			watcher,
		}
	}

	#[tokio::test]
	async fn test_poll_processes_confirmed_logs_and_advances_cursor() {
		let h = harness(500, 3, 500);
		let user = Address::from([9u8; 20]);
		h.chain.push_log(deposit_log(user, 1_000, 495, 0x11));
		// Beyond the confirmation depth, must not be picked up yet.
		h.chain.push_log(deposit_log(user, 2_000, 499, 0x22));

		h.watcher.initialize().await.unwrap();
		h.watcher.poll_once().await.unwrap();

		let row = h
			.ledger
			.get_deposit(&B256::from([0x11; 32]))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(row.status, DepositStatus::Confirmed);
		assert_eq!(row.block_number, 495);
		assert!(h
			.ledger
			.get_deposit(&B256::from([0x22; 32]))
			.await
			.unwrap()
			.is_none());

		let cursor = h.watcher.cursor.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 497);

		// Head moves; the unconfirmed deposit lands on the next poll.
		h.chain.set_head(502);
		h.watcher.poll_once().await.unwrap();
		assert!(h
			.ledger
			.get_deposit(&B256::from([0x22; 32]))
			.await
			.unwrap()
			.is_some());
	}

	#[tokio::test]
	async fn test_fetch_span_is_bounded() {
		let h = harness(10_000, 0, 10);
		h.watcher.initialize().await.unwrap();
		h.watcher.poll_once().await.unwrap();

		let cursor = h.watcher.cursor.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 499);

		h.watcher.poll_once().await.unwrap();
		let cursor = h.watcher.cursor.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 509);
	}

	#[tokio::test]
	async fn test_idle_when_no_new_confirmed_blocks() {
		let h = harness(492, 3, 500);
		h.watcher.initialize().await.unwrap();
		h.watcher.poll_once().await.unwrap();

		let cursor = h.watcher.cursor.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 489);
	}

	#[tokio::test]
	async fn test_reorg_rolls_back_and_reapplies_without_duplicates() {
		let h = harness(497, 0, 500);
		let user = Address::from([9u8; 20]);

		h.watcher.initialize().await.unwrap();
		h.watcher.poll_once().await.unwrap();

		// Block 498 arrives with a deposit; processed and cursor advanced.
		h.chain.set_head(498);
		h.chain.push_log(deposit_log(user, 1_000, 498, 0x11));
		h.watcher.poll_once().await.unwrap();
		assert_eq!(
			h.watcher.cursor.get().await.unwrap().unwrap().last_block,
			498
		);

		// Reorg: block 498 is replaced, the deposit re-mined in 499.
		h.chain.set_fork(498, 1);
		h.chain.remove_logs_at(498);
		h.chain.set_head(499);
		h.chain.push_log(deposit_log(user, 1_000, 499, 0x11));

		// Detection poll rolls back to the deepest matching block.
		h.watcher.poll_once().await.unwrap();
		let cursor = h.watcher.cursor.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 497);

		// Re-fetch poll replays 498..=499; no duplicate rows.
		h.watcher.poll_once().await.unwrap();
		let rows = h.ledger.deposits_by_user(&user).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(
			h.watcher.cursor.get().await.unwrap().unwrap().last_block,
			499
		);
	}
}
