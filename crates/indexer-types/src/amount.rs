//! Base-unit token amounts.
//!
//! Amounts are arbitrary-precision unsigned integers in the asset's base
//! units. In memory they are `U256`; on the wire and in the ledger they are
//! decimal strings, never floats.

use alloy::primitives::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An unsigned base-unit token amount, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub U256);

impl Amount {
	pub const ZERO: Self = Self(U256::ZERO);

	pub fn checked_add(self, other: Self) -> Option<Self> {
		self.0.checked_add(other.0).map(Self)
	}

	pub fn is_zero(&self) -> bool {
		self.0.is_zero()
	}
}

impl From<u64> for Amount {
	fn from(value: u64) -> Self {
		Self(U256::from(value))
	}
}

impl From<U256> for Amount {
	fn from(value: U256) -> Self {
		Self(value)
	}
}

impl fmt::Display for Amount {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// U256 renders in decimal
		write!(f, "{}", self.0)
	}
}

impl FromStr for Amount {
	type Err = alloy::primitives::ruint::ParseError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(U256::from_str_radix(s, 10)?))
	}
}

impl Serialize for Amount {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Amount {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(de::Error::custom)
	}
}
