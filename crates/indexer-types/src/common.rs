//! Chain-related primitive types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used ethereum types
pub use alloy::primitives::{Address, B256, U256};

/// Block number
pub type BlockNumber = u64;

/// Index of a log within its block
pub type LogIndex = u64;

/// Configured name of a chain (e.g. "ethereum", "base"), used to key cursors.
pub type ChainKey = String;

/// Chain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl ChainId {
	pub const ETHEREUM: Self = Self(1);
	pub const ARBITRUM: Self = Self(42161);
	pub const OPTIMISM: Self = Self(10);
	pub const BASE: Self = Self(8453);
}

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ChainId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(ChainId(s.parse()?))
	}
}

/// Raw log as returned by a chain adapter, before decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Vec<u8>,
	pub block_number: BlockNumber,
	pub transaction_hash: B256,
	pub log_index: LogIndex,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_chain_id_display_and_parse() {
		assert_eq!(ChainId::ETHEREUM.to_string(), "1");
		assert_eq!("8453".parse::<ChainId>().unwrap(), ChainId::BASE);
	}
}
