// =============================================================================
// HTTP API Integration Tests
// =============================================================================
// Drives the axum router in-process (no socket) over a ledger that confirms
// everything immediately.
// Covers:
// - POST /increment returns 202 with sequence and echoed request id
// - POST /increment returns 503 when no identities are configured
// - GET /requests/{sequence} reports pending/done, 404 for unknown
// - GET /ready, /health, /metrics
//
// Run with:
//   cargo test -p counter-relayer --test http_api

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use counter_relayer::{
    create_router, AppState, DispatchSettings, Error, IdentityPool, LedgerClient,
    RelayDispatcher, RelayService, SigningIdentity, SubmitterSettings, TransactionReceipt,
    TransactionSubmitter,
};
use ethereum_types::U64;
use primitive_types::{H160, H256, U256};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct InstantLedger;

#[async_trait]
impl LedgerClient for InstantLedger {
    async fn chain_id(&self) -> Result<u64, Error> {
        Ok(31337)
    }

    async fn block_number(&self) -> Result<u64, Error> {
        Ok(1)
    }

    async fn pending_nonce(&self, _address: H160) -> Result<u64, Error> {
        Ok(0)
    }

    async fn gas_price(&self) -> Result<U256, Error> {
        Ok(U256::one())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, Error> {
        Ok(H256::from_slice(&Keccak256::digest(raw)))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>, Error> {
        Ok(Some(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(3u64)),
            status: Some(U64::one()),
        }))
    }

    async fn read_counter(&self, _contract: H160) -> Result<U256, Error> {
        Ok(U256::from(5u64))
    }
}

fn app_state(identities: usize) -> Arc<AppState> {
    let ledger: Arc<dyn LedgerClient> = Arc::new(InstantLedger);
    let contract = H160::repeat_byte(0x42);
    let submitter = TransactionSubmitter::new(
        Arc::clone(&ledger),
        SubmitterSettings {
            contract,
            chain_id: 31337,
            gas_limit: 100_000,
            submission_timeout: Duration::from_secs(5),
            receipt_poll_interval: Duration::from_millis(5),
        },
    );
    let pool = IdentityPool::new((0..identities).map(|_| SigningIdentity::random()).collect());
    let relay = RelayService::new(Arc::new(RelayDispatcher::new(
        Arc::new(pool),
        Arc::new(submitter),
        DispatchSettings {
            max_attempts: 1,
            dispatch_backoff: Duration::from_millis(20),
            drain_timeout: Duration::from_secs(1),
        },
        100,
    )));
    Arc::new(AppState::new(Arc::new(relay), ledger, contract, 31337))
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> anyhow::Result<(StatusCode, Value, Option<String>)> {
    let response = create_router(Arc::clone(state)).oneshot(request).await?;
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, body, request_id))
}

fn get(uri: &str) -> anyhow::Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn post_increment(request_id: Option<&str>) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder().method("POST").uri("/increment");
    if let Some(id) = request_id {
        builder = builder.header("x-request-id", id);
    }
    Ok(builder.body(Body::empty())?)
}

// =============================================================================
// POST /increment
// =============================================================================

#[tokio::test]
async fn test_increment_is_accepted_with_correlation() -> anyhow::Result<()> {
    println!("\n=== Test: POST /increment returns 202 ===");

    let state = app_state(2);
    let (status, body, echoed) = send(&state, post_increment(Some("client-123"))?).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["sequence"], 1);
    assert_eq!(body["request_id"], "client-123");
    assert_eq!(echoed.as_deref(), Some("client-123"));

    state.relay.shutdown().await;
    println!("✓ Accepted with sequence 1");
    Ok(())
}

#[tokio::test]
async fn test_increment_generates_request_id_when_absent() -> anyhow::Result<()> {
    let state = app_state(1);
    let (status, body, echoed) = send(&state, post_increment(None)?).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["request_id"].as_str().unwrap_or_default().to_string();
    assert!(id.starts_with("inc-"));
    assert_eq!(echoed.as_deref(), Some(id.as_str()));

    state.relay.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_increment_without_identities_is_503() -> anyhow::Result<()> {
    println!("\n=== Test: POST /increment with empty pool ===");

    let state = app_state(0);
    let (status, body, _) = send(&state, post_increment(None)?).await?;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert_eq!(state.relay.stats().queue_depth, 0);

    println!("✓ Rejected with 503");
    Ok(())
}

// =============================================================================
// GET /requests/{sequence}
// =============================================================================

#[tokio::test]
async fn test_request_status_reports_outcome() -> anyhow::Result<()> {
    println!("\n=== Test: outcome lookup by sequence ===");

    let state = app_state(1);
    let mut rx = state.relay.subscribe();
    send(&state, post_increment(Some("lookup"))?).await?;
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await??;

    let (status, body, _) = send(&state, get("/requests/1")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "done");
    assert_eq!(body["outcome"]["status"], "confirmed");
    assert_eq!(body["outcome"]["correlation"], "lookup");
    assert_eq!(body["outcome"]["block_number"], 3);

    let (status, body, _) = send(&state, get("/requests/99")?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["state"], "unknown");

    state.relay.shutdown().await;
    println!("✓ Confirmed outcome returned, unknown sequence is 404");
    Ok(())
}

// =============================================================================
// Probes
// =============================================================================

#[tokio::test]
async fn test_ready_depends_on_pool() -> anyhow::Result<()> {
    let (status, _, _) = send(&app_state(1), get("/ready")?).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app_state(0), get("/ready")?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn test_health_reports_pool_and_dispatcher() -> anyhow::Result<()> {
    let state = app_state(3);
    let (status, body, _) = send(&state, get("/health")?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["rpc_status"], "ok");
    assert_eq!(body["chain_id"], 31337);
    assert_eq!(body["dispatcher"]["pool_size"], 3);
    assert_eq!(body["dispatcher"]["state"], "idle");
    assert_eq!(body["identities"].as_array().map(|a| a.len()), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_metrics_exposition() -> anyhow::Result<()> {
    let state = app_state(2);
    let response = create_router(Arc::clone(&state)).oneshot(get("/metrics")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let text = String::from_utf8(bytes.to_vec())?;
    assert!(text.contains("relayer_identity_pool_size 2"));
    assert!(text.contains("# TYPE relayer_queue_depth gauge"));
    assert!(text.contains("relayer_requests_accepted_total"));
    Ok(())
}
