//! Relayer configuration.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the counter relayer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,

    #[serde(default = "defaults::fallback_rpc_url")]
    pub fallback_rpc_url: String,

    /// Queried from the node when unset.
    #[serde(default)]
    pub chain_id: Option<u64>,

    #[serde(default = "defaults::contract_address")]
    pub contract_address: String,

    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    /// Hex secrets, one per signing identity.
    #[serde(default)]
    pub identity_keys: Vec<String>,

    /// Optional key file (JSON, optionally AES-256-GCM encrypted).
    #[serde(default)]
    pub keys_path: Option<String>,

    /// Base64 32-byte key for an encrypted `keys_path`.
    #[serde(default)]
    pub keys_encryption_key: Option<String>,

    /// Refuse to start with zero identities.
    #[serde(default = "defaults::require_identities")]
    pub require_identities: bool,

    #[serde(default = "defaults::gas_limit")]
    pub gas_limit: u64,

    /// Send attempts per request before it is dropped.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Bound on send + confirm for one attempt.
    #[serde(default = "defaults::submission_timeout_ms")]
    pub submission_timeout_ms: u64,

    #[serde(default = "defaults::receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,

    #[serde(default = "defaults::rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Ceiling on how long the dispatcher sleeps between availability checks.
    #[serde(default = "defaults::dispatch_backoff_ms")]
    pub dispatch_backoff_ms: u64,

    #[serde(default = "defaults::drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Outcomes kept for `/requests/{sequence}` lookups.
    #[serde(default = "defaults::outcome_history")]
    pub outcome_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: defaults::rpc_url(),
            fallback_rpc_url: defaults::fallback_rpc_url(),
            chain_id: None,
            contract_address: defaults::contract_address(),
            bind_address: defaults::bind_address(),
            identity_keys: Vec::new(),
            keys_path: None,
            keys_encryption_key: None,
            require_identities: defaults::require_identities(),
            gas_limit: defaults::gas_limit(),
            max_attempts: defaults::max_attempts(),
            submission_timeout_ms: defaults::submission_timeout_ms(),
            receipt_poll_interval_ms: defaults::receipt_poll_interval_ms(),
            rpc_timeout_ms: defaults::rpc_timeout_ms(),
            dispatch_backoff_ms: defaults::dispatch_backoff_ms(),
            drain_timeout_secs: defaults::drain_timeout_secs(),
            outcome_history: defaults::outcome_history(),
        }
    }
}

impl Config {
    pub fn submission_timeout(&self) -> Duration {
        Duration::from_millis(self.submission_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn dispatch_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatch_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Validate values that serde cannot.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::Config("max_attempts must be at least 1".into()));
        }
        if self.submission_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "submission_timeout_ms must be positive".into(),
            ));
        }
        if self.receipt_poll_interval_ms == 0 || self.dispatch_backoff_ms == 0 {
            return Err(crate::Error::Config(
                "poll and backoff intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}

mod defaults {
    pub fn rpc_url() -> String {
        "http://127.0.0.1:8545".into()
    }

    pub fn fallback_rpc_url() -> String {
        rpc_url()
    }

    pub fn contract_address() -> String {
        "0x927d45Fb81B1B14dC4E8DE8f62930D5C33a43D22".into()
    }

    pub fn bind_address() -> String {
        "0.0.0.0:3040".into()
    }

    pub fn require_identities() -> bool {
        true
    }

    pub fn gas_limit() -> u64 {
        100_000
    }

    pub fn max_attempts() -> u32 {
        3
    }

    pub fn submission_timeout_ms() -> u64 {
        30_000
    }

    pub fn receipt_poll_interval_ms() -> u64 {
        500
    }

    pub fn rpc_timeout_ms() -> u64 {
        10_000
    }

    pub fn dispatch_backoff_ms() -> u64 {
        250
    }

    pub fn drain_timeout_secs() -> u64 {
        30
    }

    pub fn outcome_history() -> usize {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.require_identities);
        assert_eq!(config.submission_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = Config {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "identity_keys": ["0x01"],
            "max_attempts": 5
        }))
        .unwrap();
        assert_eq!(config.identity_keys.len(), 1);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.gas_limit, 100_000);
        assert!(config.chain_id.is_none());
    }
}
