//! Durable per-chain cursor component.
//!
//! Thin layer over the ledger's cursor records that owns the advance /
//! rollback semantics: compare-and-set advancement (so a duplicate watcher
//! instance can never double-advance), an always-logged rollback for reorg
//! recovery, and maintenance of the bounded recent-hash window the watcher
//! uses to find a rollback point.

use crate::{LedgerStore, StorageError};
use chrono::Utc;
use indexer_types::common::{BlockNumber, B256};
use indexer_types::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blocks of (block, hash) history kept for reorg recovery.
const HASH_WINDOW: usize = 64;

/// Handle to the cursor record of one unit of work.
#[derive(Clone)]
pub struct CursorStore {
	ledger: Arc<dyn LedgerStore>,
	chain_key: String,
}

impl CursorStore {
	pub fn new(ledger: Arc<dyn LedgerStore>, chain_key: impl Into<String>) -> Self {
		Self {
			ledger,
			chain_key: chain_key.into(),
		}
	}

	pub fn chain_key(&self) -> &str {
		&self.chain_key
	}

	pub async fn get(&self) -> Result<Option<Cursor>, StorageError> {
		self.ledger.get_cursor(&self.chain_key).await
	}

	/// Advances the cursor to `block`/`hash`, requiring the stored value to
	/// still equal `expected` (the watcher's last-known position). The hash
	/// window is extended and truncated to [`HASH_WINDOW`] entries.
	pub async fn advance(
		&self,
		expected: Option<BlockNumber>,
		block: BlockNumber,
		hash: B256,
		batch_hashes: &[(BlockNumber, B256)],
	) -> Result<Cursor, StorageError> {
		let mut recent_hashes = match self.ledger.get_cursor(&self.chain_key).await? {
			Some(cursor) => cursor.recent_hashes,
			None => Vec::new(),
		};
		recent_hashes.extend_from_slice(batch_hashes);
		if !batch_hashes.iter().any(|(b, _)| *b == block) {
			recent_hashes.push((block, hash));
		}
		recent_hashes.sort_by_key(|(b, _)| *b);
		recent_hashes.dedup_by_key(|(b, _)| *b);
		if recent_hashes.len() > HASH_WINDOW {
			let excess = recent_hashes.len() - HASH_WINDOW;
			recent_hashes.drain(..excess);
		}

		let cursor = Cursor {
			chain_key: self.chain_key.clone(),
			last_block: block,
			last_hash: hash,
			recent_hashes,
			updated_at: Utc::now(),
		};
		self.ledger
			.put_cursor_if(&self.chain_key, expected, &cursor)
			.await?;
		debug!(chain_key = %self.chain_key, block, "cursor advanced");
		Ok(cursor)
	}

	/// Rolls the cursor back to `block` after a reorg. The hash window is
	/// truncated to entries at or below the rollback point.
	pub async fn rollback(&self, block: BlockNumber) -> Result<Cursor, StorageError> {
		let current = self
			.ledger
			.get_cursor(&self.chain_key)
			.await?
			.ok_or(StorageError::NotFound)?;

		let mut recent_hashes = current.recent_hashes.clone();
		recent_hashes.retain(|(b, _)| *b <= block);
		let last_hash = recent_hashes
			.iter()
			.find(|(b, _)| *b == block)
			.map(|(_, h)| *h)
			.unwrap_or(current.last_hash);

		let cursor = Cursor {
			chain_key: self.chain_key.clone(),
			last_block: block,
			last_hash,
			recent_hashes,
			updated_at: Utc::now(),
		};
		self.ledger
			.put_cursor_if(&self.chain_key, Some(current.last_block), &cursor)
			.await?;
		warn!(
			chain_key = %self.chain_key,
			from = current.last_block,
			to = block,
			"cursor rolled back for reorg recovery"
		);
		Ok(cursor)
	}

	/// Initializes the cursor at `block` if none exists yet. Used on first
	/// start so resumption always has a recorded position.
	pub async fn initialize_if_absent(
		&self,
		block: BlockNumber,
		hash: B256,
	) -> Result<Cursor, StorageError> {
		if let Some(existing) = self.get().await? {
			return Ok(existing);
		}
		info!(chain_key = %self.chain_key, block, "initializing cursor");
		self.advance(None, block, hash, &[]).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryLedger;

	fn store() -> CursorStore {
		CursorStore::new(Arc::new(MemoryLedger::new()), "ethereum:v")
	}

	#[tokio::test]
	async fn test_advance_and_rollback() {
		let store = store();
		store
			.advance(None, 497, B256::from([97u8; 32]), &[])
			.await
			.unwrap();
		store
			.advance(Some(497), 498, B256::from([98u8; 32]), &[])
			.await
			.unwrap();
		store
			.advance(Some(498), 500, B256::from([100u8; 32]), &[(499, B256::from([99u8; 32]))])
			.await
			.unwrap();

		let cursor = store.get().await.unwrap().unwrap();
		assert_eq!(cursor.last_block, 500);
		assert_eq!(cursor.recorded_hash(498), Some(B256::from([98u8; 32])));

		let rolled = store.rollback(497).await.unwrap();
		assert_eq!(rolled.last_block, 497);
		assert_eq!(rolled.last_hash, B256::from([97u8; 32]));
		assert!(rolled.recorded_hash(498).is_none());
	}

	#[tokio::test]
	async fn test_stale_advance_is_rejected() {
		let store = store();
		store
			.advance(None, 100, B256::from([1u8; 32]), &[])
			.await
			.unwrap();
		assert!(matches!(
			store.advance(Some(90), 110, B256::from([2u8; 32]), &[]).await,
			Err(StorageError::Conflict(_))
		));
	}

	#[tokio::test]
	async fn test_window_is_bounded() {
		let store = store();
		let mut expected = None;
		for block in 0..(HASH_WINDOW as u64 + 10) {
			store
				.advance(expected, block, B256::from([block as u8; 32]), &[])
				.await
				.unwrap();
			expected = Some(block);
		}
		let cursor = store.get().await.unwrap().unwrap();
		assert_eq!(cursor.recent_hashes.len(), HASH_WINDOW);
		assert!(cursor.recorded_hash(0).is_none());
	}
}
