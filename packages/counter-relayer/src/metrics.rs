//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Intake ---
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,

    // --- Outcomes ---
    pub confirmed: AtomicU64,
    pub submit_errors: AtomicU64,
    pub confirmation_timeouts: AtomicU64,
    pub reverted: AtomicU64,
    pub abandoned: AtomicU64,
    pub retries: AtomicU64,

    // --- Latency (μs, accept → terminal outcome) ---
    pub submission_us_sum: AtomicU64,
    pub submission_us_max: AtomicU64,

    // --- RPC ---
    pub rpc_failovers: AtomicU64,
    pub rpc_errors: AtomicU64,
}

/// Point-in-time gauges supplied by the caller of [`Metrics::render`].
pub struct Gauges {
    pub pool_size: usize,
    pub pool_leased: usize,
    pub queue_depth: usize,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            submit_errors: AtomicU64::new(0),
            confirmation_timeouts: AtomicU64::new(0),
            reverted: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            submission_us_sum: AtomicU64::new(0),
            submission_us_max: AtomicU64::new(0),
            rpc_failovers: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
        }
    }

    pub fn record_submission_duration(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.submission_us_sum.fetch_add(us, Ordering::Relaxed);
        // CAS loop for max tracking
        let mut cur = self.submission_us_max.load(Ordering::Relaxed);
        while us > cur {
            match self.submission_us_max.compare_exchange_weak(
                cur,
                us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, gauges: Gauges) -> String {
        let accepted = self.accepted.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let confirmed = self.confirmed.load(Ordering::Relaxed);
        let submit_errors = self.submit_errors.load(Ordering::Relaxed);
        let timeouts = self.confirmation_timeouts.load(Ordering::Relaxed);
        let reverted = self.reverted.load(Ordering::Relaxed);
        let abandoned = self.abandoned.load(Ordering::Relaxed);
        let retries = self.retries.load(Ordering::Relaxed);
        let dur_sum = self.submission_us_sum.load(Ordering::Relaxed);
        let dur_max = self.submission_us_max.swap(0, Ordering::Relaxed);
        let rpc_failovers = self.rpc_failovers.load(Ordering::Relaxed);
        let rpc_errors = self.rpc_errors.load(Ordering::Relaxed);
        let Gauges {
            pool_size,
            pool_leased,
            queue_depth,
        } = gauges;

        let dur_sum_s = dur_sum as f64 / 1_000_000.0;
        let dur_max_s = dur_max as f64 / 1_000_000.0;

        format!(
            "\
# HELP relayer_requests_accepted_total Increment requests accepted.\n\
# TYPE relayer_requests_accepted_total counter\n\
relayer_requests_accepted_total {accepted}\n\
# HELP relayer_requests_rejected_total Increment requests rejected (no identities).\n\
# TYPE relayer_requests_rejected_total counter\n\
relayer_requests_rejected_total {rejected}\n\
# HELP relayer_tx_confirmed_total Submissions confirmed on-chain.\n\
# TYPE relayer_tx_confirmed_total counter\n\
relayer_tx_confirmed_total {confirmed}\n\
# HELP relayer_tx_submit_errors_total Submissions dropped after exhausting send attempts.\n\
# TYPE relayer_tx_submit_errors_total counter\n\
relayer_tx_submit_errors_total {submit_errors}\n\
# HELP relayer_tx_confirmation_timeouts_total Ambiguous submissions awaiting operator review.\n\
# TYPE relayer_tx_confirmation_timeouts_total counter\n\
relayer_tx_confirmation_timeouts_total {timeouts}\n\
# HELP relayer_tx_reverted_total Submissions reverted on-chain.\n\
# TYPE relayer_tx_reverted_total counter\n\
relayer_tx_reverted_total {reverted}\n\
# HELP relayer_tx_abandoned_total Requests abandoned at shutdown, queued or aborted mid-flight.\n\
# TYPE relayer_tx_abandoned_total counter\n\
relayer_tx_abandoned_total {abandoned}\n\
# HELP relayer_tx_retries_total Send retries after a failed attempt.\n\
# TYPE relayer_tx_retries_total counter\n\
relayer_tx_retries_total {retries}\n\
# HELP relayer_submission_duration_seconds_sum Total accept-to-outcome time (seconds).\n\
# TYPE relayer_submission_duration_seconds_sum counter\n\
relayer_submission_duration_seconds_sum {dur_sum_s:.6}\n\
# HELP relayer_submission_duration_seconds_max Max accept-to-outcome time since last scrape (seconds).\n\
# TYPE relayer_submission_duration_seconds_max gauge\n\
relayer_submission_duration_seconds_max {dur_max_s:.6}\n\
# HELP relayer_rpc_failovers_total RPC primary-to-fallback failovers.\n\
# TYPE relayer_rpc_failovers_total counter\n\
relayer_rpc_failovers_total {rpc_failovers}\n\
# HELP relayer_rpc_errors_total RPC errors.\n\
# TYPE relayer_rpc_errors_total counter\n\
relayer_rpc_errors_total {rpc_errors}\n\
# HELP relayer_identity_pool_size Configured signing identities.\n\
# TYPE relayer_identity_pool_size gauge\n\
relayer_identity_pool_size {pool_size}\n\
# HELP relayer_identity_pool_leased Identities currently leased (in-flight submissions).\n\
# TYPE relayer_identity_pool_leased gauge\n\
relayer_identity_pool_leased {pool_leased}\n\
# HELP relayer_queue_depth Requests waiting for an identity.\n\
# TYPE relayer_queue_depth gauge\n\
relayer_queue_depth {queue_depth}\n"
        )
    }
}
