//! Dispatch loop: pairs free identities with queued requests and reclaims
//! identities as submissions finish.
//!
//! The loop is a single task. It suspends only on a queue arrival, an identity
//! release, a submission completing, the backoff ceiling, or shutdown. Each
//! submission runs on its own task and owns its lease, so the identity is back
//! in the pool before the loop looks at the result.

use crate::error::SubmissionError;
use crate::identity_pool::{IdentityLease, IdentityPool};
use crate::metrics::METRICS;
use crate::outcome::{OutcomeLog, OutcomeStatus, RequestStatus, SubmissionOutcome};
use crate::queue::{SubmissionQueue, SubmissionRequest};
use crate::submitter::{Confirmation, TransactionSubmitter};
use primitive_types::H160;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Send attempts per request, first one included.
    pub max_attempts: u32,
    /// Longest the loop sleeps with work queued and no wake-up.
    pub dispatch_backoff: Duration,
    pub drain_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DispatcherState {
    Idle = 0,
    Dispatching = 1,
    Draining = 2,
    Stopped = 3,
}

impl DispatcherState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Dispatching,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Point-in-time view for `/health` and tests.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub state: DispatcherState,
    pub pool_size: usize,
    pub pool_leased: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub dispatched: u64,
    pub pending: usize,
}

/// What a submission task hands back to the loop. The lease is already gone.
struct Completed {
    request: SubmissionRequest,
    identity: H160,
    result: Result<Confirmation, SubmissionError>,
    /// The attempt died without reporting; it may or may not have broadcast.
    crashed: bool,
}

pub struct RelayDispatcher {
    pool: Arc<IdentityPool>,
    queue: SubmissionQueue,
    submitter: Arc<TransactionSubmitter>,
    settings: DispatchSettings,
    outcomes: OutcomeLog,
    state: AtomicU8,
    dispatched: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl RelayDispatcher {
    pub fn new(
        pool: Arc<IdentityPool>,
        submitter: Arc<TransactionSubmitter>,
        settings: DispatchSettings,
        outcome_history: usize,
    ) -> Self {
        Self {
            pool,
            queue: SubmissionQueue::new(),
            submitter,
            settings,
            outcomes: OutcomeLog::new(outcome_history),
            state: AtomicU8::new(DispatcherState::Idle as u8),
            dispatched: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<IdentityPool> {
        &self.pool
    }

    pub fn queue(&self) -> &SubmissionQueue {
        &self.queue
    }

    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Record `request` as pending and put it at the tail of the queue.
    /// Returns `false` once draining has closed the queue.
    pub fn accept(&self, request: SubmissionRequest) -> bool {
        let sequence = request.sequence;
        self.outcomes.mark_pending(sequence);
        match self.queue.enqueue(request) {
            Ok(()) => true,
            Err(_) => {
                self.outcomes.forget_pending(sequence);
                false
            }
        }
    }

    pub fn status(&self, sequence: u64) -> RequestStatus {
        self.outcomes.status(sequence)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionOutcome> {
        self.outcomes.subscribe()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            state: self.state(),
            pool_size: self.pool.size(),
            pool_leased: self.pool.leased_count(),
            queue_depth: self.queue.len(),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            pending: self.outcomes.pending_count(),
        }
    }

    /// Run until `shutdown` fires, then drain.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tasks: JoinSet<Completed> = JoinSet::new();
        let mut running: HashMap<u64, SubmissionRequest> = HashMap::new();

        info!(
            identities = self.pool.size(),
            max_attempts = self.settings.max_attempts,
            "Dispatch loop started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.dispatch_available(&mut tasks, &mut running);
            self.in_flight.store(tasks.len(), Ordering::Relaxed);
            let queued = !self.queue.is_empty();
            self.set_state(if queued || !tasks.is_empty() {
                DispatcherState::Dispatching
            } else {
                DispatcherState::Idle
            });

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next() => {
                    self.handle_joined(joined, &mut running, false);
                }
                _ = self.queue.wait_for_arrival() => {}
                _ = self.pool.wait_for_release() => {}
                _ = tokio::time::sleep(self.settings.dispatch_backoff), if queued => {
                    debug!(queue_depth = self.queue.len(), "Dispatch backoff elapsed");
                }
            }
        }

        self.drain(tasks, running).await;
    }

    /// Launch as many submissions as there are free identities and queued requests.
    fn dispatch_available(
        &self,
        tasks: &mut JoinSet<Completed>,
        running: &mut HashMap<u64, SubmissionRequest>,
    ) {
        while !self.queue.is_empty() {
            let Some(lease) = self.pool.acquire() else {
                debug!(queue_depth = self.queue.len(), "All identities leased");
                break;
            };
            let Some(mut request) = self.queue.dequeue() else {
                break;
            };

            request.attempts += 1;
            request.last_identity = Some(lease.address());
            if request.dispatch_index.is_none() {
                request.dispatch_index = Some(self.dispatched.fetch_add(1, Ordering::Relaxed));
            }

            debug!(
                seq = request.sequence,
                identity = ?lease.address(),
                attempt = request.attempts,
                "Dispatching submission"
            );

            running.insert(request.sequence, request.clone());
            tasks.spawn(run_submission(Arc::clone(&self.submitter), lease, request));
            self.peak_in_flight.fetch_max(tasks.len(), Ordering::Relaxed);
        }
    }

    fn handle_joined(
        &self,
        joined: Result<Completed, JoinError>,
        running: &mut HashMap<u64, SubmissionRequest>,
        draining: bool,
    ) {
        match joined {
            Ok(done) => {
                running.remove(&done.request.sequence);
                self.handle_completion(done, draining);
            }
            // Only reachable when the set is aborted; callers account for those.
            Err(e) => debug!(error = %e, "Submission task ended without a result"),
        }
    }

    fn handle_completion(&self, done: Completed, draining: bool) {
        let Completed {
            request,
            identity,
            result,
            crashed,
        } = done;

        match result {
            Ok(confirmation) => {
                info!(
                    seq = request.sequence,
                    identity = ?identity,
                    tx_hash = ?confirmation.tx_hash,
                    block = confirmation.block_number,
                    attempt = request.attempts,
                    "Increment confirmed"
                );
                METRICS.confirmed.fetch_add(1, Ordering::Relaxed);
                self.record(
                    request,
                    Some(identity),
                    Some(confirmation),
                    OutcomeStatus::Confirmed,
                );
            }
            Err(error) => {
                let retry = error.is_retryable()
                    && !crashed
                    && !draining
                    && request.attempts < self.settings.max_attempts;

                if retry {
                    warn!(
                        seq = request.sequence,
                        identity = ?identity,
                        kind = error.kind(),
                        attempt = request.attempts,
                        error = %error,
                        "Submission failed, requeueing with a fresh identity"
                    );
                    METRICS.retries.fetch_add(1, Ordering::Relaxed);
                    self.queue.requeue(request);
                    return;
                }

                error!(
                    seq = request.sequence,
                    identity = ?identity,
                    kind = error.kind(),
                    attempt = request.attempts,
                    tx_hash = ?error.tx_hash(),
                    error = %error,
                    "Submission failed"
                );
                self.record_failure(request, Some(identity), error);
            }
        }
    }

    fn record_failure(
        &self,
        request: SubmissionRequest,
        identity: Option<H160>,
        error: SubmissionError,
    ) {
        let counter = match &error {
            SubmissionError::SubmitError { .. } => &METRICS.submit_errors,
            SubmissionError::ConfirmationTimeout { .. } => &METRICS.confirmation_timeouts,
            SubmissionError::TransactionReverted { .. } => &METRICS.reverted,
            SubmissionError::Abandoned => &METRICS.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.record(request, identity, None, OutcomeStatus::Failed { error });
    }

    fn record(
        &self,
        request: SubmissionRequest,
        identity: Option<H160>,
        confirmation: Option<Confirmation>,
        status: OutcomeStatus,
    ) {
        let elapsed = request.accepted_at.elapsed();
        METRICS.record_submission_duration(elapsed);

        let tx_hash = match (&confirmation, &status) {
            (Some(c), _) => Some(c.tx_hash),
            (None, OutcomeStatus::Failed { error }) => error.tx_hash(),
            (None, OutcomeStatus::Confirmed) => None,
        };

        self.outcomes.record(SubmissionOutcome {
            sequence: request.sequence,
            correlation: request.correlation,
            identity,
            tx_hash,
            block_number: confirmation.map(|c| c.block_number),
            attempts: request.attempts,
            dispatch_index: request.dispatch_index,
            elapsed_ms: elapsed.as_millis() as u64,
            status,
        });
    }

    /// Stop dispatching, abandon the backlog, and wait for in-flight work.
    async fn drain(
        &self,
        mut tasks: JoinSet<Completed>,
        mut running: HashMap<u64, SubmissionRequest>,
    ) {
        self.set_state(DispatcherState::Draining);

        let backlog = self.queue.drain_all();
        info!(
            in_flight = tasks.len(),
            abandoned = backlog.len(),
            "Dispatcher draining"
        );
        for request in backlog {
            warn!(
                seq = request.sequence,
                kind = "abandoned",
                "Request abandoned at shutdown"
            );
            let identity = request.last_identity;
            self.record_failure(request, identity, SubmissionError::Abandoned);
        }

        let deadline = tokio::time::Instant::now() + self.settings.drain_timeout;
        while !tasks.is_empty() {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => self.handle_joined(joined, &mut running, true),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = tasks.len(),
                        "Drain timeout, aborting in-flight submissions"
                    );
                    tasks.abort_all();
                    while let Some(joined) = tasks.join_next().await {
                        self.handle_joined(joined, &mut running, true);
                    }
                    break;
                }
            }
        }

        // Aborted mid-flight: outcome on the ledger is unknown.
        for (_, request) in running.drain() {
            error!(
                seq = request.sequence,
                identity = ?request.last_identity,
                kind = "abandoned",
                "In-flight submission aborted at shutdown"
            );
            let identity = request.last_identity;
            self.record_failure(request, identity, SubmissionError::Abandoned);
        }

        self.in_flight.store(0, Ordering::Relaxed);
        self.set_state(DispatcherState::Stopped);
        info!("Dispatch loop stopped");
    }
}

/// One attempt. The submission itself runs on an inner task that owns the
/// lease; if it panics, unwinding drops the lease and the failure comes back
/// here as a `JoinError`.
async fn run_submission(
    submitter: Arc<TransactionSubmitter>,
    lease: IdentityLease,
    request: SubmissionRequest,
) -> Completed {
    let identity = lease.address();
    let attempt = request.clone();
    let inner = AbortOnDropHandle::new(tokio::spawn(async move {
        let result = submitter.submit(lease.identity(), &attempt).await;
        debug!(
            seq = attempt.sequence,
            identity = ?lease.address(),
            held_ms = lease.held_for().as_millis() as u64,
            "Releasing identity"
        );
        drop(lease);
        result
    }));

    match inner.await {
        Ok(result) => Completed {
            request,
            identity,
            result,
            crashed: false,
        },
        Err(e) => Completed {
            request,
            identity,
            result: Err(SubmissionError::submit(format!("submission task failed: {e}"))),
            crashed: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_pool::tests::make_test_pool;
    use crate::ledger::{LedgerClient, TransactionReceipt};
    use crate::submitter::SubmitterSettings;
    use async_trait::async_trait;
    use ethereum_types::U64;
    use primitive_types::{H256, U256};
    use sha3::Digest;
    use std::sync::atomic::AtomicU32;

    /// Confirms everything after `delay`, except the first `fail_sends` broadcasts.
    struct DelayedLedger {
        delay: Duration,
        fail_sends: AtomicU32,
        panic_on_nonce: bool,
    }

    #[async_trait]
    impl LedgerClient for DelayedLedger {
        async fn chain_id(&self) -> Result<u64, crate::Error> {
            Ok(1)
        }

        async fn block_number(&self) -> Result<u64, crate::Error> {
            Ok(1)
        }

        async fn pending_nonce(&self, _address: H160) -> Result<u64, crate::Error> {
            if self.panic_on_nonce {
                panic!("nonce source exploded");
            }
            Ok(0)
        }

        async fn gas_price(&self) -> Result<U256, crate::Error> {
            Ok(U256::one())
        }

        async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, crate::Error> {
            let failing = self
                .fail_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(crate::Error::Rpc("nonce too low".into()));
            }
            Ok(H256::from_slice(&sha3::Keccak256::digest(raw)))
        }

        async fn transaction_receipt(
            &self,
            tx_hash: H256,
        ) -> Result<Option<TransactionReceipt>, crate::Error> {
            tokio::time::sleep(self.delay).await;
            Ok(Some(TransactionReceipt {
                transaction_hash: tx_hash,
                block_number: Some(U64::from(2u64)),
                status: Some(U64::one()),
            }))
        }

        async fn read_counter(&self, _contract: H160) -> Result<U256, crate::Error> {
            Ok(U256::zero())
        }
    }

    fn dispatcher(identities: usize, ledger: DelayedLedger, max_attempts: u32) -> Arc<RelayDispatcher> {
        let submitter = TransactionSubmitter::new(
            Arc::new(ledger),
            SubmitterSettings {
                contract: H160::repeat_byte(9),
                chain_id: 1,
                gas_limit: 50_000,
                submission_timeout: Duration::from_secs(2),
                receipt_poll_interval: Duration::from_millis(5),
            },
        );
        Arc::new(RelayDispatcher::new(
            Arc::new(make_test_pool(identities)),
            Arc::new(submitter),
            DispatchSettings {
                max_attempts,
                dispatch_backoff: Duration::from_millis(20),
                drain_timeout: Duration::from_secs(2),
            },
            100,
        ))
    }

    fn ledger(delay_ms: u64) -> DelayedLedger {
        DelayedLedger {
            delay: Duration::from_millis(delay_ms),
            fail_sends: AtomicU32::new(0),
            panic_on_nonce: false,
        }
    }

    async fn wait_done(d: &RelayDispatcher, sequence: u64) -> SubmissionOutcome {
        let mut rx = d.subscribe();
        loop {
            if let RequestStatus::Done { outcome } = d.status(sequence) {
                return outcome;
            }
            let _ = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        }
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            DispatcherState::Idle,
            DispatcherState::Dispatching,
            DispatcherState::Draining,
            DispatcherState::Stopped,
        ] {
            assert_eq!(DispatcherState::from_u8(state as u8), state);
        }
    }

    #[tokio::test]
    async fn test_confirms_and_returns_to_idle() {
        let d = dispatcher(2, ledger(5), 1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&d).run(shutdown.clone()));

        d.accept(SubmissionRequest::new(1, Some("a".into())));
        let outcome = tokio::time::timeout(Duration::from_secs(2), wait_done(&d, 1))
            .await
            .unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(outcome.correlation.as_deref(), Some("a"));
        assert_eq!(outcome.block_number, Some(2));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(d.state(), DispatcherState::Idle);
        assert_eq!(d.pool().leased_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(d.state(), DispatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_submit_error_is_retried_until_attempts_run_out() {
        let failing = DelayedLedger {
            fail_sends: AtomicU32::new(10),
            ..ledger(1)
        };
        let d = dispatcher(2, failing, 3);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&d).run(shutdown.clone()));

        d.accept(SubmissionRequest::new(1, None));
        let outcome = tokio::time::timeout(Duration::from_secs(2), wait_done(&d, 1))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.error(),
            Some(SubmissionError::SubmitError { .. })
        ));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_submission_releases_identity_and_is_not_retried() {
        let exploding = DelayedLedger {
            panic_on_nonce: true,
            ..ledger(1)
        };
        let d = dispatcher(1, exploding, 5);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&d).run(shutdown.clone()));

        d.accept(SubmissionRequest::new(1, None));
        let outcome = tokio::time::timeout(Duration::from_secs(2), wait_done(&d, 1))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.is_confirmed());
        assert_eq!(d.pool().leased_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_backlog_and_finishes_in_flight() {
        let d = dispatcher(1, ledger(100), 1);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&d).run(shutdown.clone()));

        for seq in 1..=3 {
            d.accept(SubmissionRequest::new(seq, None));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();

        match d.status(1) {
            RequestStatus::Done { outcome } => assert!(outcome.is_confirmed()),
            other => panic!("expected seq 1 done, got {other:?}"),
        }
        for seq in 2..=3 {
            match d.status(seq) {
                RequestStatus::Done { outcome } => {
                    assert_eq!(outcome.error(), Some(&SubmissionError::Abandoned));
                }
                other => panic!("expected seq {seq} abandoned, got {other:?}"),
            }
        }
        assert!(d.queue().is_empty());
        assert_eq!(d.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_drain_timeout_aborts_and_releases() {
        let d = {
            let submitter = TransactionSubmitter::new(
                Arc::new(ledger(10_000)),
                SubmitterSettings {
                    contract: H160::repeat_byte(9),
                    chain_id: 1,
                    gas_limit: 50_000,
                    submission_timeout: Duration::from_secs(60),
                    receipt_poll_interval: Duration::from_millis(5),
                },
            );
            Arc::new(RelayDispatcher::new(
                Arc::new(make_test_pool(1)),
                Arc::new(submitter),
                DispatchSettings {
                    max_attempts: 1,
                    dispatch_backoff: Duration::from_millis(20),
                    drain_timeout: Duration::from_millis(50),
                },
                100,
            ))
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&d).run(shutdown.clone()));

        d.accept(SubmissionRequest::new(1, None));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(d.pool().leased_count(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // Aborted inner tasks drop their leases on their next scheduling.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(d.pool().leased_count(), 0);
        match d.status(1) {
            RequestStatus::Done { outcome } => {
                assert_eq!(outcome.error(), Some(&SubmissionError::Abandoned));
            }
            other => panic!("expected abandoned, got {other:?}"),
        }
    }
}
