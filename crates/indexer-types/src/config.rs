//! Static configuration consumed by the indexer.
//!
//! Per-vault configuration is supplied as read-only input: chain id,
//! contract address, asset address/decimals, ordered RPC endpoint list and
//! the confirmation-depth safety margin. Validation happens at load time in
//! `indexer-config`; a vault that fails validation stops only its own unit.

use crate::common::{Address, ChainId, ChainKey};
use serde::{Deserialize, Serialize};

/// Top-level service configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
	pub service: ServiceSettings,
	#[serde(default)]
	pub chains: Vec<ChainConfig>,
	#[serde(default)]
	pub vaults: Vec<VaultConfig>,
}

/// Service-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
	pub name: String,
	/// Directory for the file-backed ledger.
	#[serde(default = "default_data_dir")]
	pub data_dir: String,
	/// Hour of day (UTC) at which the daily snapshot run fires.
	#[serde(default)]
	pub snapshot_hour_utc: u32,
	/// Seconds a pending intent may wait for a match before expiring.
	#[serde(default = "default_intent_ttl")]
	pub intent_ttl_secs: u64,
}

fn default_data_dir() -> String {
	"./data/ledger".to_string()
}

const fn default_intent_ttl() -> u64 {
	86_400
}

/// One configured chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
	/// Name used to key cursors and to reference this chain from vaults.
	pub key: ChainKey,
	pub chain_id: ChainId,
	/// Ordered RPC endpoint list; later entries are fallbacks.
	pub rpc_endpoints: Vec<String>,
	/// Safety margin: blocks to wait past an event before treating it final.
	pub confirmation_depth: u64,
	#[serde(default = "default_poll_interval")]
	pub poll_interval_secs: u64,
	/// Maximum block span per log query, to respect provider limits.
	#[serde(default = "default_max_block_span")]
	pub max_block_span: u64,
	#[serde(default = "default_rpc_timeout")]
	pub rpc_timeout_secs: u64,
}

const fn default_poll_interval() -> u64 {
	12
}

const fn default_max_block_span() -> u64 {
	500
}

const fn default_rpc_timeout() -> u64 {
	10
}

/// One configured vault contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
	/// Key of the chain this vault lives on.
	pub chain_key: ChainKey,
	pub address: Address,
	pub asset_address: Address,
	pub asset_decimals: u8,
	/// First block to index when no cursor exists yet.
	pub start_block: u64,
}

/// A vault joined with its chain configuration: the unit-of-work identity.
#[derive(Debug, Clone)]
pub struct VaultContext {
	pub vault: VaultConfig,
	pub chain: ChainConfig,
}

impl VaultContext {
	/// Chain-scoped cursor key for this unit of work.
	pub fn cursor_key(&self) -> String {
		format!("{}:{}", self.chain.key, self.vault.address)
	}
}
