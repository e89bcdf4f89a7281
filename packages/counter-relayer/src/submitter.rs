//! Builds, signs, broadcasts and confirms one increment transaction.

use crate::error::SubmissionError;
use crate::identity::SigningIdentity;
use crate::ledger::LedgerClient;
use crate::queue::SubmissionRequest;
use crate::transaction::LegacyTransaction;
use primitive_types::{H160, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub contract: H160,
    pub chain_id: u64,
    pub gas_limit: u64,
    /// Bound on prepare + broadcast + confirm.
    pub submission_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

/// A confirmed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: H256,
    pub block_number: u64,
    pub nonce: u64,
}

/// Stateless with respect to the pool: callers own the lease for the whole call.
pub struct TransactionSubmitter {
    client: Arc<dyn LedgerClient>,
    settings: SubmitterSettings,
}

impl TransactionSubmitter {
    pub fn new(client: Arc<dyn LedgerClient>, settings: SubmitterSettings) -> Self {
        Self { client, settings }
    }

    /// Submit one `increment()` call signed by `identity` and wait for its receipt.
    ///
    /// Failures before the raw transaction is handed to the node, and sends the
    /// node definitely refused, are `SubmitError`. Once broadcast has started,
    /// running out of time is a `ConfirmationTimeout`, because the transaction
    /// may still be included. That includes a send whose answer never came back.
    pub async fn submit(
        &self,
        identity: &SigningIdentity,
        request: &SubmissionRequest,
    ) -> Result<Confirmation, SubmissionError> {
        let deadline = Instant::now() + self.settings.submission_timeout;
        let address = identity.address();

        let prepared = timeout_at(deadline, async {
            tokio::try_join!(
                self.client.pending_nonce(address),
                self.client.gas_price()
            )
        })
        .await;
        let (nonce, gas_price) = match prepared {
            Err(_) => return Err(SubmissionError::submit("deadline reached before broadcast")),
            Ok(Err(e)) => return Err(SubmissionError::submit(e.to_string())),
            Ok(Ok(values)) => values,
        };

        let tx = LegacyTransaction::increment(
            nonce,
            gas_price,
            self.settings.gas_limit,
            self.settings.contract,
            self.settings.chain_id,
        );
        let signed = identity
            .sign_transaction(&tx)
            .map_err(|e| SubmissionError::submit(e.to_string()))?;
        let tx_hash = signed.hash;

        match timeout_at(deadline, self.client.send_raw_transaction(&signed.raw)).await {
            Err(_) => return Err(SubmissionError::ConfirmationTimeout { tx_hash }),
            // The node may hold it; only a receipt for our own hash can settle that.
            Ok(Err(crate::Error::BroadcastUnknown(reason))) => {
                warn!(
                    seq = request.sequence,
                    identity = ?address,
                    tx_hash = ?tx_hash,
                    reason = %reason,
                    "Broadcast outcome unknown, waiting for receipt"
                );
            }
            Ok(Err(e)) => return Err(SubmissionError::submit(e.to_string())),
            Ok(Ok(returned)) if returned != tx_hash => {
                warn!(
                    seq = request.sequence,
                    expected = ?tx_hash,
                    returned = ?returned,
                    "Node reported a different transaction hash"
                );
            }
            Ok(Ok(_)) => {}
        }

        debug!(
            seq = request.sequence,
            identity = ?address,
            nonce,
            tx_hash = ?tx_hash,
            "Transaction broadcast"
        );

        let receipt = timeout_at(
            deadline,
            self.client
                .wait_for_receipt(tx_hash, self.settings.receipt_poll_interval),
        )
        .await
        .map_err(|_| SubmissionError::ConfirmationTimeout { tx_hash })?;

        if !receipt.succeeded() {
            return Err(SubmissionError::TransactionReverted {
                tx_hash,
                block_number: receipt.block(),
            });
        }

        Ok(Confirmation {
            tx_hash,
            block_number: receipt.block(),
            nonce,
        })
    }
}
