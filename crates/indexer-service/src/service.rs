//! Service wiring: builds every component from configuration and owns the
//! spawned tasks until shutdown.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use indexer_chains::{ChainAdapter, RpcChainAdapter, RpcConfig};
use indexer_config::ConfigLoader;
use indexer_engine::{EpochTracker, ReconciliationEngine};
use indexer_intents::IntentRegistry;
use indexer_snapshots::{schedule, SnapshotBuilder};
use indexer_storage::{CursorStore, FileLedger, LedgerStore};
use indexer_types::common::Address;
use indexer_types::{ServiceConfig, VaultContext};
use indexer_watcher::WatcherUnit;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How often the pending-intent expiry sweep runs.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);

/// Per-chain shared components.
struct ChainRuntime {
	adapter: Arc<dyn ChainAdapter>,
	epochs: Arc<EpochTracker>,
	engine: Arc<ReconciliationEngine>,
	vaults: Vec<Address>,
}

/// The running indexer: one watcher task per (chain, vault), a snapshot
/// scheduler per chain, and the intent expiry sweep.
pub struct IndexerService {
	shutdown_tx: watch::Sender<bool>,
	handles: Vec<JoinHandle<()>>,
}

impl IndexerService {
	pub async fn start(config: ServiceConfig) -> Result<Self> {
		let ledger: Arc<dyn LedgerStore> = Arc::new(
			FileLedger::open(config.service.data_dir.clone())
				.await
				.map_err(|e| anyhow::anyhow!("failed to open ledger: {e}"))?,
		);

		let (units, failures) = ConfigLoader::build_units(&config);
		if units.is_empty() {
			anyhow::bail!("no runnable vault units ({} failed validation)", failures.len());
		}
		for failure in &failures {
			warn!(error = %failure, "vault excluded from this run");
		}

		let vault_chains: HashMap<_, _> = units
			.iter()
			.map(|u| (u.vault.address, u.chain.chain_id))
			.collect();
		let registry = Arc::new(IntentRegistry::new(
			ledger.clone(),
			vault_chains,
			ChronoDuration::seconds(config.service.intent_ttl_secs as i64),
		));

		let runtimes = Self::build_chain_runtimes(&units, &ledger, &registry)?;
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let mut handles = Vec::new();

		for unit in units {
			let runtime = runtimes
				.get(&unit.chain.key)
				.context("chain runtime missing for unit")?;
			let cursor = CursorStore::new(ledger.clone(), unit.cursor_key());
			let watcher = WatcherUnit::new(
				unit,
				runtime.adapter.clone(),
				runtime.engine.clone(),
				runtime.epochs.clone(),
				cursor,
			);
			let rx = shutdown_rx.clone();
			handles.push(tokio::spawn(async move {
				if let Err(e) = watcher.run(rx).await {
					error!(error = %e, "watcher unit exited with error");
				}
			}));
		}

		for (key, runtime) in &runtimes {
			let builder = Arc::new(SnapshotBuilder::new(
				ledger.clone(),
				runtime.adapter.clone(),
				runtime.epochs.clone(),
			));
			let vaults = runtime.vaults.clone();
			let hour = config.service.snapshot_hour_utc;
			let rx = shutdown_rx.clone();
			info!(chain = %key, vaults = vaults.len(), "starting snapshot scheduler");
			handles.push(tokio::spawn(schedule::run_daily(builder, vaults, hour, rx)));
		}

		handles.push(tokio::spawn(Self::run_expiry_sweep(
			registry,
			shutdown_rx,
		)));

		info!(
			service = %config.service.name,
			tasks = handles.len(),
			"indexer service started"
		);
		Ok(Self {
			shutdown_tx,
			handles,
		})
	}

	fn build_chain_runtimes(
		units: &[VaultContext],
		ledger: &Arc<dyn LedgerStore>,
		registry: &Arc<IntentRegistry>,
	) -> Result<HashMap<String, ChainRuntime>> {
		let mut runtimes: HashMap<String, ChainRuntime> = HashMap::new();
		for unit in units {
			if let Some(runtime) = runtimes.get_mut(&unit.chain.key) {
				runtime.vaults.push(unit.vault.address);
				continue;
			}
			let rpc_config = RpcConfig::new(unit.chain.rpc_endpoints.clone())
				.with_timeout(Duration::from_secs(unit.chain.rpc_timeout_secs));
			let adapter: Arc<dyn ChainAdapter> = Arc::new(
				RpcChainAdapter::new(unit.chain.chain_id, rpc_config)
					.map_err(|e| anyhow::anyhow!("chain '{}': {e}", unit.chain.key))?,
			);
			let epochs = Arc::new(EpochTracker::new(adapter.clone()));
			let engine = Arc::new(ReconciliationEngine::new(
				ledger.clone(),
				registry.clone(),
				epochs.clone(),
			));
			runtimes.insert(
				unit.chain.key.clone(),
				ChainRuntime {
					adapter,
					epochs,
					engine,
					vaults: vec![unit.vault.address],
				},
			);
		}
		Ok(runtimes)
	}

	async fn run_expiry_sweep(
		registry: Arc<IntentRegistry>,
		mut shutdown: watch::Receiver<bool>,
	) {
		loop {
			tokio::select! {
				_ = tokio::time::sleep(EXPIRY_SWEEP_INTERVAL) => {
					if let Err(e) = registry.expire_stale(Utc::now()).await {
						warn!(error = %e, "intent expiry sweep failed");
					}
				}
				_ = shutdown.changed() => {
					if *shutdown.borrow() {
						info!("intent expiry sweep stopping");
						return;
					}
				}
			}
		}
	}

	/// Signals every task to stop and waits for them to finish their
	/// in-flight work.
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(true);
		futures::future::join_all(self.handles).await;
		info!("indexer service stopped");
	}
}
