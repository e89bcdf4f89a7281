//! HTTP request handlers.

use crate::dispatcher::DispatcherState;
use crate::metrics::{Gauges, METRICS};
use crate::middleware::RequestId;
use crate::outcome::RequestStatus;
use crate::relay::SubmitResponse;
use crate::response::{HealthResponse, IdentityLoad, IncrementResponse};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

/// Queue one `increment()` submission. Never waits on the network.
pub async fn increment(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(req_id)): Extension<RequestId>,
) -> (StatusCode, Json<IncrementResponse>) {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    match state.relay.submit_increment(Some(req_id.clone())) {
        SubmitResponse::Accepted { sequence } => {
            info!(req_id = %req_id, seq = sequence, "Increment queued");
            (
                StatusCode::ACCEPTED,
                Json(IncrementResponse::accepted(sequence, req_id)),
            )
        }
        SubmitResponse::Rejected { reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(IncrementResponse::err(reason, Some(req_id))),
        ),
    }
}

/// Outcome lookup. `GET /requests/{sequence}`
pub async fn request_status(
    State(state): State<Arc<AppState>>,
    Path(sequence): Path<u64>,
) -> impl IntoResponse {
    match state.relay.outcome(sequence) {
        RequestStatus::Unknown => (StatusCode::NOT_FOUND, Json(RequestStatus::Unknown)),
        status => (StatusCode::OK, Json(status)),
    }
}

/// Readiness probe. 200 once identities are loaded and the dispatcher is accepting.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    let accepting = !matches!(
        stats.state,
        DispatcherState::Draining | DispatcherState::Stopped
    );

    if !state.ready.load(Ordering::Relaxed) && stats.pool_size > 0 {
        state.ready.store(true, Ordering::Relaxed);
    }

    if state.ready.load(Ordering::Relaxed) && accepting {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.relay.stats();
    let body = METRICS.render(Gauges {
        pool_size: stats.pool_size,
        pool_leased: stats.pool_leased,
        queue_depth: stats.queue_depth,
    });
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

/// Health check with pool, queue, dispatcher, and RPC status.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rpc_status = state.ledger.health().await.unwrap_or("unavailable");
    let stats = state.relay.stats();

    let status = if rpc_status == "unavailable" || stats.pool_size == 0 {
        "unavailable"
    } else if rpc_status == "degraded" || stats.state == DispatcherState::Draining {
        "degraded"
    } else {
        "ok"
    };

    let identities = state
        .relay
        .dispatcher()
        .pool()
        .lease_counts()
        .into_iter()
        .map(|(address, leases)| IdentityLoad { address, leases })
        .collect();

    Json(HealthResponse {
        status,
        contract: state.contract,
        chain_id: state.chain_id,
        uptime_secs: state.start_time.elapsed().as_secs(),
        requests: state.request_count.load(Ordering::Relaxed),
        rpc_status,
        dispatcher: stats,
        identities,
    })
}
