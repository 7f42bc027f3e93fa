//! Configuration loading and validation.
//!
//! Configuration is TOML with `${VAR}` placeholders substituted from the
//! environment before parsing, so RPC endpoints with embedded API keys never
//! land in the file itself. Service-level validation is fatal; per-vault
//! validation is isolated, so one misconfigured vault never stops the rest.

use anyhow::{bail, Context, Result};
use indexer_types::{ChainConfig, IndexerError, ServiceConfig, VaultConfig, VaultContext};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
	/// Load configuration from a TOML file, substituting environment
	/// placeholders and applying environment overrides.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ServiceConfig> {
		let path = path.as_ref();
		info!("Loading configuration from {:?}", path);

		let contents = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file: {:?}", path))?;
		let mut config = Self::from_toml(&contents)?;
		Self::apply_env_overrides(&mut config);
		Self::validate_service(&config)?;
		Ok(config)
	}

	/// Load from a TOML string.
	pub fn from_toml(contents: &str) -> Result<ServiceConfig> {
		let substituted = substitute_env(contents)?;
		toml::from_str(&substituted).map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))
	}

	/// Environment overrides for values that vary per deployment.
	fn apply_env_overrides(config: &mut ServiceConfig) {
		if let Ok(dir) = std::env::var("INDEXER_DATA_DIR") {
			config.service.data_dir = dir;
		}
		for chain in &mut config.chains {
			let var = format!("INDEXER_RPC_URLS_{}", chain.key.to_uppercase());
			if let Ok(urls) = std::env::var(&var) {
				chain.rpc_endpoints = urls.split(',').map(|s| s.trim().to_string()).collect();
			}
		}
	}

	/// Service-level validation. Failures here abort startup.
	pub fn validate_service(config: &ServiceConfig) -> Result<()> {
		if config.service.name.is_empty() {
			bail!("service.name must not be empty");
		}
		if config.service.snapshot_hour_utc > 23 {
			bail!(
				"service.snapshot_hour_utc must be 0-23, got {}",
				config.service.snapshot_hour_utc
			);
		}

		let mut keys = HashSet::new();
		for chain in &config.chains {
			if !keys.insert(chain.key.as_str()) {
				bail!("duplicate chain key '{}'", chain.key);
			}
			if chain.rpc_endpoints.is_empty() {
				bail!("chain '{}' has no rpc_endpoints", chain.key);
			}
			if chain.max_block_span == 0 {
				bail!("chain '{}' has max_block_span = 0", chain.key);
			}
		}
		Ok(())
	}

	/// Joins each vault with its chain, isolating per-vault failures.
	///
	/// Returns the runnable units plus the fatal error for every vault that
	/// failed validation; callers log the failures and run the rest.
	pub fn build_units(config: &ServiceConfig) -> (Vec<VaultContext>, Vec<IndexerError>) {
		let mut units = Vec::new();
		let mut failures = Vec::new();
		for vault in &config.vaults {
			match Self::validate_vault(vault, &config.chains) {
				Ok(unit) => units.push(unit),
				Err(e) => {
					warn!(vault = %vault.address, error = %e, "skipping misconfigured vault");
					failures.push(e);
				}
			}
		}
		(units, failures)
	}

	fn validate_vault(
		vault: &VaultConfig,
		chains: &[ChainConfig],
	) -> std::result::Result<VaultContext, IndexerError> {
		let fatal = |reason: String| IndexerError::FatalConfig {
			vault: vault.address.to_string(),
			reason,
		};

		let chain = chains
			.iter()
			.find(|c| c.key == vault.chain_key)
			.ok_or_else(|| fatal(format!("unknown chain key '{}'", vault.chain_key)))?;
		if vault.address == indexer_types::common::Address::ZERO {
			return Err(fatal("vault address is zero".to_string()));
		}
		if vault.asset_address == indexer_types::common::Address::ZERO {
			return Err(fatal("asset address is zero".to_string()));
		}
		if vault.asset_decimals > 36 {
			return Err(fatal(format!(
				"asset_decimals {} is out of range",
				vault.asset_decimals
			)));
		}

		Ok(VaultContext {
			vault: vault.clone(),
			chain: chain.clone(),
		})
	}
}

/// Replaces `${VAR}` placeholders with environment values. An unset variable
/// is an error rather than an empty string.
fn substitute_env(contents: &str) -> Result<String> {
	let placeholder =
		Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").context("invalid placeholder pattern")?;
	let mut missing = Vec::new();
	let substituted = placeholder.replace_all(contents, |caps: &regex::Captures| {
		let name = &caps[1];
		match std::env::var(name) {
			Ok(value) => value,
			Err(_) => {
				missing.push(name.to_string());
				String::new()
			}
		}
	});
	if !missing.is_empty() {
		bail!("unset environment variables in config: {}", missing.join(", "));
	}
	Ok(substituted.into_owned())
}
