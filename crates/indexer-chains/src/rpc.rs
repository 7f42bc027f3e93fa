//! JSON-RPC chain adapter.
//!
//! Talks to EVM nodes over HTTP. Each adapter owns an ordered list of RPC
//! endpoints: requests go to the active endpoint, transient failures are
//! retried with exponential backoff and jitter, and repeated failures rotate
//! to the next endpoint in the list. All requests are time-bounded; an
//! exhausted retry budget surfaces as a transient error and the caller
//! defers to its next poll cycle.

use crate::{ChainAdapter, ChainError};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use indexer_types::common::{Address, BlockNumber, Log, B256};
use indexer_types::ChainId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Tuning for one adapter.
#[derive(Debug, Clone)]
pub struct RpcConfig {
	/// Ordered endpoint list; later entries are fallbacks.
	pub endpoints: Vec<String>,
	/// Per-request timeout.
	pub timeout: Duration,
	/// Retry attempts per logical request before giving up.
	pub max_retries: u32,
	/// Consecutive failures before rotating to the next endpoint.
	pub failover_threshold: u32,
}

impl RpcConfig {
	pub fn new(endpoints: Vec<String>) -> Self {
		Self {
			endpoints,
			timeout: Duration::from_secs(10),
			max_retries: 3,
			failover_threshold: 2,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

/// EVM chain adapter over raw JSON-RPC.
pub struct RpcChainAdapter {
	chain_id: ChainId,
	client: reqwest::Client,
	config: RpcConfig,
	active_endpoint: AtomicUsize,
	consecutive_failures: AtomicU32,
	request_id: AtomicU64,
}

impl RpcChainAdapter {
	pub fn new(chain_id: ChainId, config: RpcConfig) -> Result<Self, ChainError> {
		if config.endpoints.is_empty() {
			return Err(ChainError::Decode("no RPC endpoints configured".to_string()));
		}
		let client = reqwest::Client::builder()
			.timeout(config.timeout)
			.build()
			.map_err(|e| ChainError::Transient(e.to_string()))?;
		Ok(Self {
			chain_id,
			client,
			config,
			active_endpoint: AtomicUsize::new(0),
			consecutive_failures: AtomicU32::new(0),
			request_id: AtomicU64::new(1),
		})
	}

	fn endpoint(&self) -> &str {
		let index = self.active_endpoint.load(Ordering::Relaxed) % self.config.endpoints.len();
		&self.config.endpoints[index]
	}

	/// Records a failure; rotates to the next endpoint once the threshold
	/// of consecutive failures is reached.
	fn record_failure(&self) {
		let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
		if failures >= self.config.failover_threshold && self.config.endpoints.len() > 1 {
			let next = (self.active_endpoint.load(Ordering::Relaxed) + 1)
				% self.config.endpoints.len();
			self.active_endpoint.store(next, Ordering::Relaxed);
			self.consecutive_failures.store(0, Ordering::Relaxed);
			warn!(
				chain = %self.chain_id,
				endpoint = %self.config.endpoints[next],
				"rotating to fallback RPC endpoint"
			);
		}
	}

	fn record_success(&self) {
		self.consecutive_failures.store(0, Ordering::Relaxed);
	}

	async fn request<P: Serialize, R: DeserializeOwned>(
		&self,
		method: &str,
		params: P,
	) -> Result<R, ChainError> {
		let mut backoff = ExponentialBackoff {
			initial_interval: Duration::from_millis(250),
			max_elapsed_time: Some(Duration::from_secs(30)),
			..Default::default()
		};
		let mut attempts = 0;

		loop {
			match self.request_once(method, &params).await {
				Ok(result) => {
					self.record_success();
					return Ok(result);
				}
				Err(e) if e.is_transient() => {
					attempts += 1;
					self.record_failure();
					if attempts > self.config.max_retries {
						warn!(
							chain = %self.chain_id,
							method,
							attempts,
							"rpc request exhausted retries: {e}"
						);
						return Err(e);
					}
					match backoff.next_backoff() {
						Some(delay) => {
							debug!(
								chain = %self.chain_id,
								method,
								attempts,
								?delay,
								"retrying rpc request: {e}"
							);
							tokio::time::sleep(delay).await;
						}
						None => return Err(e),
					}
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn request_once<P: Serialize, R: DeserializeOwned>(
		&self,
		method: &str,
		params: &P,
	) -> Result<R, ChainError> {
		let body = JsonRpcRequest {
			jsonrpc: "2.0",
			id: self.request_id.fetch_add(1, Ordering::Relaxed),
			method,
			params,
		};

		let response = self
			.client
			.post(self.endpoint())
			.json(&body)
			.send()
			.await
			.map_err(|e| ChainError::Transient(e.to_string()))?;

		if response.status().as_u16() == 429 {
			return Err(ChainError::Transient("rate limited".to_string()));
		}

		let parsed: JsonRpcResponse<R> = response
			.json()
			.await
			.map_err(|e| ChainError::Transient(e.to_string()))?;

		if let Some(error) = parsed.error {
			return Err(ChainError::Rpc {
				code: error.code,
				message: error.message,
			});
		}
		parsed
			.result
			.ok_or_else(|| ChainError::Decode("missing result".to_string()))
	}

	async fn get_block(&self, block: BlockNumber) -> Result<Option<RpcBlock>, ChainError> {
		self.request(
			"eth_getBlockByNumber",
			serde_json::json!([to_hex(block), false]),
		)
		.await
	}
}

#[async_trait]
impl ChainAdapter for RpcChainAdapter {
	fn chain_id(&self) -> ChainId {
		self.chain_id
	}

	async fn block_number(&self) -> Result<BlockNumber, ChainError> {
		let hex: String = self.request("eth_blockNumber", serde_json::json!([])).await?;
		parse_quantity(&hex)
	}

	async fn block_hash(&self, block: BlockNumber) -> Result<Option<B256>, ChainError> {
		match self.get_block(block).await? {
			Some(header) => Ok(Some(parse_b256(&header.hash)?)),
			None => Ok(None),
		}
	}

	async fn block_timestamp(&self, block: BlockNumber) -> Result<u64, ChainError> {
		let header = self
			.get_block(block)
			.await?
			.ok_or_else(|| ChainError::Transient(format!("block {block} not available")))?;
		parse_quantity(&header.timestamp)
	}

	async fn get_logs(
		&self,
		address: Address,
		topics: &[B256],
		from_block: BlockNumber,
		to_block: BlockNumber,
	) -> Result<Vec<Log>, ChainError> {
		let topic0: Vec<String> = topics.iter().map(|t| format!("{t}")).collect();
		let filter = serde_json::json!([{
			"address": format!("{address}"),
			"topics": [topic0],
			"fromBlock": to_hex(from_block),
			"toBlock": to_hex(to_block),
		}]);
		let raw: Vec<RpcLog> = self.request("eth_getLogs", filter).await?;
		raw.into_iter().map(RpcLog::into_log).collect()
	}

	async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
		let params = serde_json::json!([
			{ "to": format!("{to}"), "data": format!("0x{}", hex::encode(data)) },
			"latest",
		]);
		let hex: String = self.request("eth_call", params).await?;
		parse_hex_bytes(&hex)
	}
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
	jsonrpc: &'a str,
	id: u64,
	method: &'a str,
	params: P,
}

#[derive(Deserialize)]
struct JsonRpcResponse<R> {
	result: Option<R>,
	error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
	hash: String,
	timestamp: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
	address: String,
	topics: Vec<String>,
	data: String,
	block_number: String,
	transaction_hash: String,
	log_index: String,
}

impl RpcLog {
	fn into_log(self) -> Result<Log, ChainError> {
		Ok(Log {
			address: self
				.address
				.parse()
				.map_err(|e| ChainError::Decode(format!("log address: {e}")))?,
			topics: self
				.topics
				.iter()
				.map(|t| parse_b256(t))
				.collect::<Result<_, _>>()?,
			data: parse_hex_bytes(&self.data)?,
			block_number: parse_quantity(&self.block_number)?,
			transaction_hash: parse_b256(&self.transaction_hash)?,
			log_index: parse_quantity(&self.log_index)?,
		})
	}
}

fn to_hex(value: u64) -> String {
	format!("0x{value:x}")
}

fn parse_quantity(hex: &str) -> Result<u64, ChainError> {
	let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
	u64::from_str_radix(trimmed, 16)
		.map_err(|e| ChainError::Decode(format!("quantity {hex}: {e}")))
}

fn parse_b256(hex: &str) -> Result<B256, ChainError> {
	hex.parse()
		.map_err(|e| ChainError::Decode(format!("hash {hex}: {e}")))
}

fn parse_hex_bytes(hex: &str) -> Result<Vec<u8>, ChainError> {
	let trimmed = hex.strip_prefix("0x").unwrap_or(hex);
	::hex::decode(trimmed).map_err(|e| ChainError::Decode(format!("bytes: {e}")))
}
