//! Relay service: the single entry point callers use to submit increments.

use crate::dispatcher::{DispatcherStats, RelayDispatcher};
use crate::metrics::METRICS;
use crate::outcome::{RequestStatus, SubmissionOutcome};
use crate::queue::SubmissionRequest;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitResponse {
    Accepted { sequence: u64 },
    Rejected { reason: String },
}

impl SubmitResponse {
    pub fn sequence(&self) -> Option<u64> {
        match self {
            SubmitResponse::Accepted { sequence } => Some(*sequence),
            SubmitResponse::Rejected { .. } => None,
        }
    }
}

/// Accepts requests without waiting on the network and keeps exactly one
/// dispatch loop running behind them.
pub struct RelayService {
    dispatcher: Arc<RelayDispatcher>,
    next_sequence: AtomicU64,
    loop_started: AtomicBool,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RelayService {
    pub fn new(dispatcher: Arc<RelayDispatcher>) -> Self {
        Self {
            dispatcher,
            next_sequence: AtomicU64::new(1),
            loop_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &Arc<RelayDispatcher> {
        &self.dispatcher
    }

    /// Queue one increment. Returns as soon as the request is queued.
    pub fn submit_increment(&self, correlation: Option<String>) -> SubmitResponse {
        if self.dispatcher.pool().is_empty() {
            METRICS.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(req_id = ?correlation, "Rejected: no signing identities configured");
            return SubmitResponse::Rejected {
                reason: crate::Error::PoolMisconfigured.to_string(),
            };
        }
        if self.shutdown.is_cancelled() {
            return self.reject_shutting_down(correlation);
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // The queue closes when draining starts, so losing the race with
        // shutdown() ends up here rather than in a queue nobody reads.
        if !self
            .dispatcher
            .accept(SubmissionRequest::new(sequence, correlation.clone()))
        {
            return self.reject_shutting_down(correlation);
        }
        debug!(seq = sequence, req_id = ?correlation, "Increment accepted");
        METRICS.accepted.fetch_add(1, Ordering::Relaxed);

        self.start();
        SubmitResponse::Accepted { sequence }
    }

    fn reject_shutting_down(&self, correlation: Option<String>) -> SubmitResponse {
        METRICS.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(req_id = ?correlation, "Rejected: relay is shutting down");
        SubmitResponse::Rejected {
            reason: "relay is shutting down".into(),
        }
    }

    /// Spawn the dispatch loop unless it is already running. Safe to call repeatedly.
    pub fn start(&self) {
        if self
            .loop_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let handle = tokio::spawn(Arc::clone(&self.dispatcher).run(self.shutdown.clone()));
        *self.loop_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn is_running(&self) -> bool {
        self.loop_started.load(Ordering::Acquire) && !self.shutdown.is_cancelled()
    }

    pub fn outcome(&self, sequence: u64) -> RequestStatus {
        self.dispatcher.status(sequence)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionOutcome> {
        self.dispatcher.subscribe()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Stop accepting, then wait for the dispatch loop to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatch loop ended abnormally");
            }
        }
        info!("Relay service stopped");
    }
}
