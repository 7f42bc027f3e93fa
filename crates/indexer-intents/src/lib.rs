//! Intent registry for the vault indexer.
//!
//! Accepts user-signed deposit intents independently of chain activity.
//! An intent is an EIP-712 typed-data message over a vault-scoped domain
//! separator; its signing hash doubles as the globally unique `intent_hash`,
//! which is what makes resubmission of an identical payload a natural no-op.
//!
//! Replay and reordering protection: the nonce of a new intent must strictly
//! exceed the highest nonce ever accepted for the same (user, vault) pair.

use alloy::primitives::{Signature, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use chrono::{DateTime, Duration, Utc};
use indexer_storage::{LedgerStore, StorageError};
use indexer_types::common::{Address, B256};
use indexer_types::{
	Amount, ChainId, DepositIntent, IndexerError, IntentStatus, ValidationError,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const DOMAIN_NAME: &str = "VaultDepositIntent";
const DOMAIN_VERSION: &str = "1";

sol! {
	/// Canonical signed payload of a deposit intent.
	struct DepositIntentPayload {
		address user;
		address vault;
		address asset;
		uint256 amount;
		uint256 nonce;
		uint256 deadline;
	}
}

/// A deposit intent as submitted: the typed-data fields plus the 65-byte
/// ECDSA signature over their EIP-712 digest.
#[derive(Debug, Clone)]
pub struct SignedDepositIntent {
	pub user_address: Address,
	pub vault_address: Address,
	pub asset_address: Address,
	pub amount: Amount,
	pub nonce: u64,
	/// End of the submission window, unix seconds.
	pub deadline: u64,
	pub signature: Vec<u8>,
}

impl SignedDepositIntent {
	fn payload(&self) -> DepositIntentPayload {
		DepositIntentPayload {
			user: self.user_address,
			vault: self.vault_address,
			asset: self.asset_address,
			amount: self.amount.0,
			nonce: U256::from(self.nonce),
			deadline: U256::from(self.deadline),
		}
	}
}

/// Vault-scoped EIP-712 domain separator.
pub fn intent_domain(chain_id: ChainId, vault: Address) -> Eip712Domain {
	Eip712Domain {
		name: Some(Cow::Borrowed(DOMAIN_NAME)),
		version: Some(Cow::Borrowed(DOMAIN_VERSION)),
		chain_id: Some(U256::from(chain_id.0)),
		verifying_contract: Some(vault),
		salt: None,
	}
}

/// Deterministic intent hash: the EIP-712 signing hash of the payload.
pub fn intent_hash(chain_id: ChainId, intent: &SignedDepositIntent) -> B256 {
	intent
		.payload()
		.eip712_signing_hash(&intent_domain(chain_id, intent.vault_address))
}

/// Validates and stores signed deposit intents; serves pending-intent
/// lookups to the reconciliation engine.
pub struct IntentRegistry {
	ledger: Arc<dyn LedgerStore>,
	/// Chain each configured vault lives on; submissions for unknown vaults
	/// are rejected.
	vault_chains: HashMap<Address, ChainId>,
	/// How long a pending intent may wait for a match before expiring.
	ttl: Duration,
}

impl IntentRegistry {
	pub fn new(
		ledger: Arc<dyn LedgerStore>,
		vault_chains: HashMap<Address, ChainId>,
		ttl: Duration,
	) -> Self {
		Self {
			ledger,
			vault_chains,
			ttl,
		}
	}

	/// Validates a signed intent and persists it as pending.
	///
	/// Resubmitting an identical payload short-circuits to the stored row
	/// and returns the same hash. All rejections are synchronous; nothing
	/// invalid is ever persisted.
	pub async fn submit(&self, signed: &SignedDepositIntent) -> Result<B256, IndexerError> {
		let chain_id = *self
			.vault_chains
			.get(&signed.vault_address)
			.ok_or(ValidationError::UnknownVault(signed.vault_address))?;

		let now = Utc::now();
		if now.timestamp() as u64 > signed.deadline {
			return Err(ValidationError::ExpiredWindow {
				deadline: signed.deadline,
			}
			.into());
		}

		let hash = intent_hash(chain_id, signed);

		// Identical payload hashes identically; treat as a no-op before any
		// nonce check can reject the replay.
		if self.storage(self.ledger.get_intent(&hash).await)?.is_some() {
			debug!(intent_hash = %hash, "duplicate intent submission, returning stored hash");
			return Ok(hash);
		}

		let signature = Signature::try_from(signed.signature.as_slice())
			.map_err(|e| ValidationError::MalformedSignature(e.to_string()))?;
		let recovered = signature
			.recover_address_from_prehash(&hash)
			.map_err(|e| ValidationError::MalformedSignature(e.to_string()))?;
		if recovered != signed.user_address {
			return Err(ValidationError::BadSignature.into());
		}

		let highest = self.storage(
			self.ledger
				.highest_nonce(&signed.user_address, &signed.vault_address)
				.await,
		)?;
		if let Some(highest) = highest {
			if signed.nonce <= highest {
				return Err(ValidationError::StaleNonce {
					submitted: signed.nonce,
					highest,
				}
				.into());
			}
		}

		let record = DepositIntent {
			intent_hash: hash,
			user_address: signed.user_address,
			vault_address: signed.vault_address,
			asset_address: signed.asset_address,
			amount: signed.amount,
			nonce: signed.nonce,
			status: IntentStatus::Pending,
			created_at: now,
			executed_at: None,
		};
		match self.ledger.insert_intent(&record).await {
			Ok(()) => {
				info!(
					intent_hash = %hash,
					user = %signed.user_address,
					vault = %signed.vault_address,
					amount = %signed.amount,
					nonce = signed.nonce,
					"intent registered"
				);
				Ok(hash)
			}
			// Lost a race with an identical submission; same hash, same row.
			Err(StorageError::Conflict(_)) => Ok(hash),
			Err(e) => Err(IndexerError::Storage(e.to_string())),
		}
	}

	/// Pending intent matching (user, vault, amount) exactly, lowest nonce
	/// first.
	pub async fn lookup(
		&self,
		user: &Address,
		vault: &Address,
		amount: &Amount,
	) -> Result<Option<DepositIntent>, IndexerError> {
		self.storage(self.ledger.find_pending_intent(user, vault, amount).await)
	}

	/// Transitions a matched intent to executed.
	pub async fn mark_executed(
		&self,
		intent_hash: &B256,
		executed_at: DateTime<Utc>,
	) -> Result<(), IndexerError> {
		let mut intent = self
			.storage(self.ledger.get_intent(intent_hash).await)?
			.ok_or_else(|| IndexerError::Storage(format!("intent {intent_hash} vanished")))?;
		intent.status = IntentStatus::Executed;
		intent.executed_at = Some(executed_at);
		self.storage(self.ledger.update_intent(&intent).await)
	}

	/// Expires pending intents older than the configured TTL. Returns the
	/// number of intents transitioned.
	pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, IndexerError> {
		let cutoff = now - self.ttl;
		let stale = self.storage(self.ledger.pending_intents_before(cutoff).await)?;
		let count = stale.len();
		for mut intent in stale {
			intent.status = IntentStatus::Expired;
			self.storage(self.ledger.update_intent(&intent).await)?;
		}
		if count > 0 {
			info!(count, "expired stale pending intents");
		}
		Ok(count)
	}

	fn storage<T>(&self, result: Result<T, StorageError>) -> Result<T, IndexerError> {
		result.map_err(|e| IndexerError::Storage(e.to_string()))
	}
}
