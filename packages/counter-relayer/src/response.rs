//! Response types for the relayer API.

use crate::dispatcher::DispatcherStats;
use primitive_types::H160;
use serde::Serialize;

/// Response from `POST /increment`.
#[derive(Serialize)]
pub struct IncrementResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IncrementResponse {
    pub fn accepted(sequence: u64, request_id: String) -> Self {
        Self {
            success: true,
            sequence: Some(sequence),
            request_id: Some(request_id),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            success: false,
            sequence: None,
            request_id,
            error: Some(error.into()),
        }
    }
}

/// Response from the health endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub contract: H160,
    pub chain_id: u64,
    pub uptime_secs: u64,
    pub requests: u64,
    pub rpc_status: &'static str,
    pub dispatcher: DispatcherStats,
    pub identities: Vec<IdentityLoad>,
}

/// Lifetime lease count for one identity.
#[derive(Serialize)]
pub struct IdentityLoad {
    pub address: H160,
    pub leases: u64,
}
