//! Terminal outcome records and the bounded history behind correlation lookups.

use crate::error::SubmissionError;
use primitive_types::{H160, H256};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;

const SUBSCRIBER_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Confirmed,
    Failed { error: SubmissionError },
}

/// Result record for one accepted request.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub sequence: u64,
    pub correlation: Option<String>,
    /// Identity used by the final attempt.
    pub identity: Option<H160>,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub attempts: u32,
    /// Position in first-dispatch order.
    pub dispatch_index: Option<u64>,
    /// Accept → terminal outcome.
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl SubmissionOutcome {
    pub fn is_confirmed(&self) -> bool {
        self.status == OutcomeStatus::Confirmed
    }

    pub fn error(&self) -> Option<&SubmissionError> {
        match &self.status {
            OutcomeStatus::Failed { error } => Some(error),
            OutcomeStatus::Confirmed => None,
        }
    }
}

/// Where an accepted request currently stands.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestStatus {
    /// Queued or in flight.
    Pending,
    Done { outcome: SubmissionOutcome },
    /// Never accepted, or evicted from history.
    Unknown,
}

struct History {
    pending: HashSet<u64>,
    done: HashMap<u64, SubmissionOutcome>,
    order: VecDeque<u64>,
}

/// Outcome history (bounded) plus a live broadcast of every recorded outcome.
pub struct OutcomeLog {
    history: Mutex<History>,
    capacity: usize,
    tx: broadcast::Sender<SubmissionOutcome>,
}

impl OutcomeLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            history: Mutex::new(History {
                pending: HashSet::new(),
                done: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_pending(&self, sequence: u64) {
        self.lock().pending.insert(sequence);
    }

    /// Drop a pending mark for a request that was never queued.
    pub fn forget_pending(&self, sequence: u64) {
        self.lock().pending.remove(&sequence);
    }

    pub fn record(&self, outcome: SubmissionOutcome) {
        {
            let mut h = self.lock();
            h.pending.remove(&outcome.sequence);
            h.order.push_back(outcome.sequence);
            h.done.insert(outcome.sequence, outcome.clone());
            while h.order.len() > self.capacity {
                if let Some(evicted) = h.order.pop_front() {
                    h.done.remove(&evicted);
                }
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(outcome);
    }

    pub fn status(&self, sequence: u64) -> RequestStatus {
        let h = self.lock();
        if let Some(outcome) = h.done.get(&sequence) {
            RequestStatus::Done {
                outcome: outcome.clone(),
            }
        } else if h.pending.contains(&sequence) {
            RequestStatus::Pending
        } else {
            RequestStatus::Unknown
        }
    }

    pub fn get(&self, sequence: u64) -> Option<SubmissionOutcome> {
        self.lock().done.get(&sequence).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubmissionOutcome> {
        self.tx.subscribe()
    }
}
