//! Application state shared across handlers.

use crate::config::Config;
use crate::dispatcher::{DispatchSettings, RelayDispatcher};
use crate::identity::parse_address;
use crate::identity_pool::IdentityPool;
use crate::key_store::load_identities;
use crate::ledger::LedgerClient;
use crate::relay::RelayService;
use crate::rpc::RpcClient;
use crate::submitter::{SubmitterSettings, TransactionSubmitter};
use primitive_types::H160;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub ledger: Arc<dyn LedgerClient>,
    pub contract: H160,
    pub chain_id: u64,
    pub start_time: Instant,
    pub request_count: AtomicU64,
    pub ready: AtomicBool,
}

impl AppState {
    pub fn new(
        relay: Arc<RelayService>,
        ledger: Arc<dyn LedgerClient>,
        contract: H160,
        chain_id: u64,
    ) -> Self {
        Self {
            relay,
            ledger,
            contract,
            chain_id,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    /// Build the full relay from configuration: identities, RPC client, dispatcher.
    pub async fn from_config(config: Config) -> Result<Self, crate::Error> {
        config.validate()?;

        let identities = load_identities(&config)?;
        if identities.is_empty() {
            if config.require_identities {
                return Err(crate::Error::PoolMisconfigured);
            }
            warn!("No signing identities configured, every increment will be rejected");
        }

        let contract = parse_address(&config.contract_address)?;
        let rpc = RpcClient::new(
            &config.rpc_url,
            &config.fallback_rpc_url,
            config.rpc_timeout(),
        )?;

        let chain_id = match config.chain_id {
            Some(id) => id,
            None => {
                let id = rpc.chain_id().await?;
                info!(chain_id = id, "Chain id queried from node");
                id
            }
        };

        let ledger: Arc<dyn LedgerClient> = Arc::new(rpc);
        let submitter = TransactionSubmitter::new(
            Arc::clone(&ledger),
            SubmitterSettings {
                contract,
                chain_id,
                gas_limit: config.gas_limit,
                submission_timeout: config.submission_timeout(),
                receipt_poll_interval: config.receipt_poll_interval(),
            },
        );
        let dispatcher = RelayDispatcher::new(
            Arc::new(IdentityPool::new(identities)),
            Arc::new(submitter),
            DispatchSettings {
                max_attempts: config.max_attempts,
                dispatch_backoff: config.dispatch_backoff(),
                drain_timeout: config.drain_timeout(),
            },
            config.outcome_history,
        );

        let relay = Arc::new(RelayService::new(Arc::new(dispatcher)));
        Ok(Self::new(relay, ledger, contract, chain_id))
    }
}
