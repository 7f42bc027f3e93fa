//! Shared types for the vault indexer system.
//!
//! This crate defines the types that flow between the indexer components:
//! chain primitives, the decimal-string amount representation, the persisted
//! ledger records, decoded vault events, configuration structs and the error
//! taxonomy. It deliberately contains no I/O.

pub mod amount;
pub mod common;
pub mod config;
pub mod errors;
pub mod events;
pub mod records;

pub use amount::Amount;
pub use common::{BlockNumber, ChainId, ChainKey, Log, LogIndex};
pub use config::{ChainConfig, ServiceConfig, ServiceSettings, VaultConfig, VaultContext};
pub use errors::{IndexerError, Result, ValidationError};
pub use events::{ChainEvent, EventKind, VaultEvent};
pub use records::{
	Cursor, Deposit, DepositIntent, DepositStatus, IntentStatus, Snapshot, Withdrawal,
	WithdrawalStatus,
};
