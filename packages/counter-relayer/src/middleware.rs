//! Authentication and request correlation middleware.

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

pub const API_KEY_VAR: &str = "RELAYER_API_KEY";

/// Cached API key from env. `None` = dev mode (no auth).
static API_KEY: OnceLock<Option<String>> = OnceLock::new();

fn expected_api_key() -> &'static Option<String> {
    API_KEY.get_or_init(|| std::env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty()))
}

/// Whether `/increment` requires a key.
pub fn auth_enabled() -> bool {
    expected_api_key().is_some()
}

/// Validate `X-Api-Key` or `Authorization: Bearer`. Bypassed when
/// `RELAYER_API_KEY` is unset. Comparison is constant-time.
pub async fn api_key_auth(request: Request, next: Next) -> Response {
    let Some(expected) = expected_api_key() else {
        return next.run(request).await;
    };

    let headers = request.headers();
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        });

    if provided.is_some_and(|key| key_matches(key, expected)) {
        return next.run(request).await;
    }

    let body = serde_json::json!({
        "success": false,
        "error": "Unauthorized: invalid or missing API key"
    });
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}

fn key_matches(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len() && provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Propagate or generate `x-request-id`. The id becomes the request's
/// correlation token and is echoed on the response.
pub async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            use rand::Rng;
            format!("inc-{:016x}", rand::thread_rng().gen::<u64>())
        });

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", val);
    }

    response
}

/// Request correlation id, extractable from `Request::extensions()`.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);
