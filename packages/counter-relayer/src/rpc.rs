//! JSON-RPC client with primary → fallback failover and circuit breaker.

use crate::ledger::{LedgerClient, TransactionReceipt};
use crate::metrics::METRICS;
use crate::transaction::COUNTER_SELECTOR;
use async_trait::async_trait;
use ethereum_types::U64;
use primitive_types::{H160, H256, U256};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Why a call failed.
enum CallError {
    /// No connection was made, so the request never left.
    Unreachable(String),
    /// The request may have been delivered but no usable answer came back.
    Transport(String),
    /// The node answered with a JSON-RPC error.
    Node(String),
}

/// Ethereum JSON-RPC client over HTTP.
pub struct RpcClient {
    http: reqwest::Client,
    primary_url: String,
    fallback_url: String,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(
        primary_url: &str,
        fallback_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to build HTTP client: {e}")))?;

        info!(
            primary = primary_url,
            fallback = fallback_url,
            "RPC client initialized with failover"
        );

        Ok(Self {
            http,
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` on the active endpoint, falling back once on transport failure.
    /// Node-level errors are returned as-is.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, crate::Error> {
        let value = self.call_with_failover(method, &params, true).await?;
        decode_result(method, value)
    }

    /// With `replayable` unset, the other endpoint is only tried when the first
    /// was never reached. A request that may have been delivered is reported
    /// as `BroadcastUnknown` instead of being sent a second time.
    async fn call_with_failover(
        &self,
        method: &str,
        params: &Value,
        replayable: bool,
    ) -> Result<Value, crate::Error> {
        let active = self.active_url().to_string();
        let first = match self.call_url(&active, method, params).await {
            Ok(v) => {
                self.record_success();
                return Ok(v);
            }
            Err(CallError::Node(msg)) => {
                self.record_success();
                return Err(crate::Error::Rpc(format!("{method}: {msg}")));
            }
            Err(CallError::Transport(e)) if !replayable => {
                self.record_failure();
                return Err(crate::Error::BroadcastUnknown(format!("{method}: {e}")));
            }
            Err(CallError::Transport(e)) | Err(CallError::Unreachable(e)) => e,
        };

        self.record_failure();
        let other = if active == self.primary_url {
            &self.fallback_url
        } else {
            &self.primary_url
        };
        warn!(method, error = %first, "RPC call failed, trying other endpoint");
        match self.call_url(other, method, params).await {
            Ok(v) => Ok(v),
            Err(CallError::Node(msg)) => Err(crate::Error::Rpc(format!("{method}: {msg}"))),
            Err(CallError::Transport(e)) if !replayable => Err(crate::Error::BroadcastUnknown(
                format!("{method}: first={first}, second={e}"),
            )),
            Err(CallError::Transport(e)) | Err(CallError::Unreachable(e)) => Err(
                crate::Error::Rpc(format!("{method} failed on both RPCs: first={first}, second={e}")),
            ),
        }
    }

    async fn call_url(&self, url: &str, method: &str, params: &Value) -> Result<Value, CallError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CallError::Unreachable(e.to_string())
                } else {
                    CallError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CallError::Transport(format!("HTTP {}", response.status())));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| CallError::Transport(format!("invalid JSON-RPC body: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(CallError::Node(format!("{} (code {})", err.message, err.code)));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Quick connectivity check. Returns "ok", "degraded", or error.
    pub async fn health_check(&self) -> Result<&'static str, crate::Error> {
        let params = json!([]);
        match self.call_url(&self.primary_url, "eth_blockNumber", &params).await {
            Ok(_) => Ok("ok"),
            Err(_) => match self
                .call_url(&self.fallback_url, "eth_blockNumber", &params)
                .await
            {
                Ok(_) => Ok("degraded"),
                Err(CallError::Unreachable(e))
                | Err(CallError::Transport(e))
                | Err(CallError::Node(e)) => {
                    Err(crate::Error::Rpc(format!("Both RPCs unreachable: {e}")))
                }
            },
        }
    }

    // --- Failover / circuit breaker ---

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if circuit.failures > 0 && !circuit.open {
            info!(primary = %self.primary_url, "Primary RPC recovered");
            circuit.failures = 0;
        }
    }

    fn record_failure(&self) {
        METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open {
            circuit.open = true;
            self.total_failovers.fetch_add(1, Ordering::Relaxed);
            METRICS.rpc_failovers.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = circuit.failures,
                fallback = %self.fallback_url,
                "Circuit breaker opened, routing to fallback"
            );
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if !circuit.open {
            return false;
        }
        if now_ms().saturating_sub(circuit.last_failure_ms) > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "Circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }

    pub fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }

    /// Currently active RPC URL.
    pub fn active_url(&self) -> &str {
        if self.is_circuit_open() {
            &self.fallback_url
        } else {
            &self.primary_url
        }
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn chain_id(&self) -> Result<u64, crate::Error> {
        let id: U64 = self.call("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn block_number(&self) -> Result<u64, crate::Error> {
        let n: U64 = self.call("eth_blockNumber", json!([])).await?;
        Ok(n.as_u64())
    }

    async fn pending_nonce(&self, address: H160) -> Result<u64, crate::Error> {
        let n: U64 = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(n.as_u64())
    }

    async fn gas_price(&self) -> Result<U256, crate::Error> {
        self.call("eth_gasPrice", json!([])).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, crate::Error> {
        let method = "eth_sendRawTransaction";
        let params = json!([format!("0x{}", hex::encode(raw))]);
        let value = self.call_with_failover(method, &params, false).await?;
        decode_result(method, value)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, crate::Error> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    async fn health(&self) -> Result<&'static str, crate::Error> {
        self.health_check().await
    }

    async fn read_counter(&self, contract: H160) -> Result<U256, crate::Error> {
        let data = format!("0x{}", hex::encode(COUNTER_SELECTOR));
        let result: String = self
            .call("eth_call", json!([{ "to": contract, "data": data }, "latest"]))
            .await?;
        decode_word(&result)
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, crate::Error> {
    serde_json::from_value(value)
        .map_err(|e| crate::Error::Rpc(format!("{method}: unexpected result shape: {e}")))
}

/// Decode a 32-byte ABI word returned by `eth_call`.
fn decode_word(hex_str: &str) -> Result<U256, crate::Error> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| crate::Error::Rpc(format!("eth_call returned non-hex data: {e}")))?;
    if bytes.len() != 32 {
        return Err(crate::Error::Rpc(format!(
            "eth_call returned {} bytes, expected 32",
            bytes.len()
        )));
    }
    Ok(U256::from_big_endian(&bytes))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
