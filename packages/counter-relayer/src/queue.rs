//! FIFO backlog of submission requests awaiting an identity.

use primitive_types::H160;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// One accepted increment request.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub sequence: u64,
    /// Unix millis at acceptance.
    pub created_at_ms: u64,
    pub accepted_at: Instant,
    /// Caller's correlation token (the HTTP `x-request-id`).
    pub correlation: Option<String>,
    /// Attempts started so far.
    pub attempts: u32,
    pub last_identity: Option<H160>,
    /// Position in first-dispatch order, assigned on the first attempt.
    pub dispatch_index: Option<u64>,
}

impl SubmissionRequest {
    pub fn new(sequence: u64, correlation: Option<String>) -> Self {
        Self {
            sequence,
            created_at_ms: now_ms(),
            accepted_at: Instant::now(),
            correlation,
            attempts: 0,
            last_identity: None,
            dispatch_index: None,
        }
    }
}

/// Unbounded FIFO queue. Each operation is a single critical section.
///
/// Once closed by `drain_all`, the queue refuses new requests, so nothing can
/// slip in behind the final drain.
pub struct SubmissionQueue {
    inner: Mutex<QueueInner>,
    arrived: Notify,
}

#[derive(Default)]
struct QueueInner {
    items: VecDeque<SubmissionRequest>,
    closed: bool,
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            arrived: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append to the tail and wake the dispatcher. Hands the request back if
    /// the queue has been closed.
    pub fn enqueue(&self, request: SubmissionRequest) -> Result<(), SubmissionRequest> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(request);
            }
            inner.items.push_back(request);
        }
        self.arrived.notify_one();
        Ok(())
    }

    /// Put a retried request back at the head so it keeps its place.
    pub fn requeue(&self, request: SubmissionRequest) {
        self.lock().items.push_front(request);
        self.arrived.notify_one();
    }

    pub fn dequeue(&self) -> Option<SubmissionRequest> {
        self.lock().items.pop_front()
    }

    /// Close the queue and remove everything still waiting, in order.
    pub fn drain_all(&self) -> Vec<SubmissionRequest> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.items.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Resolves after the next enqueue (or immediately if one happened since the last wait).
    pub async fn wait_for_arrival(&self) {
        self.arrived.notified().await;
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
