//! Network client contract consumed by the submitter.

use async_trait::async_trait;
use ethereum_types::U64;
use primitive_types::{H160, H256, U256};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Inclusion receipt for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<U64>,
    /// `1` success, `0` revert. Absent on pre-Byzantium chains.
    pub status: Option<U64>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.map(|s| !s.is_zero()).unwrap_or(true)
    }

    pub fn block(&self) -> u64 {
        self.block_number.map(|b| b.as_u64()).unwrap_or_default()
    }
}

/// What the relay needs from the ledger. Reads are idempotent; sends return the
/// transaction hash synchronously and confirmation arrives later via receipts.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64, crate::Error>;

    async fn block_number(&self) -> Result<u64, crate::Error>;

    /// Next nonce for `address`, counting transactions still in the mempool.
    async fn pending_nonce(&self, address: H160) -> Result<u64, crate::Error>;

    async fn gas_price(&self) -> Result<U256, crate::Error>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, crate::Error>;

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> Result<Option<TransactionReceipt>, crate::Error>;

    /// Current value of the contract's `counter()` view.
    async fn read_counter(&self, contract: H160) -> Result<U256, crate::Error>;

    /// Connectivity check: `"ok"`, `"degraded"` (serving from a fallback), or error.
    async fn health(&self) -> Result<&'static str, crate::Error> {
        self.block_number().await.map(|_| "ok")
    }

    /// Poll until the transaction is included. Never gives up on its own;
    /// callers bound it with a timeout.
    async fn wait_for_receipt(&self, tx_hash: H256, poll_interval: Duration) -> TransactionReceipt {
        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return receipt,
                Ok(_) => {}
                Err(e) => debug!(tx_hash = ?tx_hash, error = %e, "Receipt poll failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
