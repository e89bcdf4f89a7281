//! Error types for the relayer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use primitive_types::H256;
use serde::Serialize;
use std::fmt;

/// Relayer error type.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(String),
    /// RPC communication error.
    Rpc(String),
    /// A raw transaction may have reached the node but no answer came back.
    BroadcastUnknown(String),
    /// Key material or transaction signing error.
    Signing(String),
    /// The identity pool has no identities.
    PoolMisconfigured,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Rpc(msg) => write!(f, "rpc error: {msg}"),
            Error::BroadcastUnknown(msg) => write!(f, "broadcast outcome unknown: {msg}"),
            Error::Signing(msg) => write!(f, "signing error: {msg}"),
            Error::PoolMisconfigured => write!(f, "identity pool is empty"),
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Config(_) | Error::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Rpc(_) | Error::BroadcastUnknown(_) => StatusCode::BAD_GATEWAY,
            Error::PoolMisconfigured => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string()
        });
        (status, Json(body)).into_response()
    }
}

/// Why a single submission attempt did not confirm.
///
/// Reported by the submitter; the dispatch loop decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionError {
    /// Preparing or broadcasting the transaction failed. Safe to retry with a fresh lease.
    SubmitError { reason: String },
    /// Broadcast was attempted but no receipt arrived before the deadline.
    /// The transaction may still land, so it is never resubmitted automatically.
    ConfirmationTimeout { tx_hash: H256 },
    /// The transaction was included and reverted.
    TransactionReverted { tx_hash: H256, block_number: u64 },
    /// The relay shut down before the request was dispatched, or aborted it mid-flight.
    Abandoned,
}

impl SubmissionError {
    pub fn submit(reason: impl Into<String>) -> Self {
        SubmissionError::SubmitError {
            reason: reason.into(),
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionError::SubmitError { .. } => "submit_error",
            SubmissionError::ConfirmationTimeout { .. } => "confirmation_timeout",
            SubmissionError::TransactionReverted { .. } => "transaction_reverted",
            SubmissionError::Abandoned => "abandoned",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::SubmitError { .. })
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            SubmissionError::ConfirmationTimeout { tx_hash }
            | SubmissionError::TransactionReverted { tx_hash, .. } => Some(*tx_hash),
            _ => None,
        }
    }
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::SubmitError { reason } => write!(f, "submit failed: {reason}"),
            SubmissionError::ConfirmationTimeout { tx_hash } => {
                write!(f, "no confirmation for {tx_hash:?} before deadline")
            }
            SubmissionError::TransactionReverted {
                tx_hash,
                block_number,
            } => write!(f, "{tx_hash:?} reverted in block {block_number}"),
            SubmissionError::Abandoned => write!(f, "abandoned on shutdown"),
        }
    }
}

impl std::error::Error for SubmissionError {}
