use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexer_config::ConfigLoader;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod service;

#[derive(Parser)]
#[command(name = "vault-indexer")]
#[command(about = "Vault chain-event indexing and reconciliation service", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/indexer.toml")]
	config: PathBuf,

	#[arg(long, env = "INDEXER_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the indexer service
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_service(cli).await,
		Some(Commands::Validate) => validate_config(cli),
	}
}

async fn start_service(cli: Cli) -> Result<()> {
	info!("Starting vault indexer");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::from_file(&cli.config).context("Failed to load configuration")?;

	info!("Service name: {}", config.service.name);
	info!("Ledger directory: {}", config.service.data_dir);

	let service = service::IndexerService::start(config)
		.await
		.context("Failed to start indexer service")?;

	setup_shutdown_signal().await;

	info!("Shutdown signal received, stopping services...");
	service.shutdown().await;
	Ok(())
}

fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::from_file(&cli.config).context("Failed to load configuration")?;
	let (units, failures) = ConfigLoader::build_units(&config);

	info!("Configuration is valid");
	info!("Service name: {}", config.service.name);
	for chain in &config.chains {
		info!(
			"  Chain: {} (id {}, {} endpoints, depth {})",
			chain.key,
			chain.chain_id,
			chain.rpc_endpoints.len(),
			chain.confirmation_depth
		);
	}
	for unit in &units {
		info!(
			"  Vault: {} on {} from block {}",
			unit.vault.address, unit.chain.key, unit.vault.start_block
		);
	}
	for failure in &failures {
		info!("  Invalid vault: {}", failure);
	}

	if !failures.is_empty() {
		anyhow::bail!("{} vault(s) failed validation", failures.len());
	}
	Ok(())
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn setup_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
