//! Fixed pool of signing identities with exclusive leases.
//!
//! Lock-free round-robin acquisition. Each slot flips free → leased with a
//! single compare-and-swap, so two callers can never hold the same identity.

mod slot;

pub use slot::{IdentityLease, IdentitySlot};

use crate::identity::SigningIdentity;
use primitive_types::H160;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::info;

/// The identity pool.
pub struct IdentityPool {
    slots: Vec<Arc<IdentitySlot>>,
    next: AtomicU64,
    released: Arc<Notify>,
}

impl IdentityPool {
    pub fn new(identities: Vec<SigningIdentity>) -> Self {
        let slots: Vec<Arc<IdentitySlot>> = identities
            .into_iter()
            .map(|identity| Arc::new(IdentitySlot::new(identity)))
            .collect();

        info!(identities = slots.len(), "Identity pool initialized");

        Self {
            slots,
            next: AtomicU64::new(0),
            released: Arc::new(Notify::new()),
        }
    }

    // --- Hot path ---

    /// Lease a free identity, or `None` when every identity is leased.
    /// Scans from a rotating cursor so no identity is starved.
    pub fn acquire(&self) -> Option<IdentityLease> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) as usize;
        for i in 0..len {
            let slot = &self.slots[(start + i) % len];
            if let Some(generation) = slot.try_lease() {
                return Some(IdentityLease {
                    slot: Arc::clone(slot),
                    generation,
                    acquired_at: Instant::now(),
                    released: Arc::clone(&self.released),
                });
            }
        }

        None
    }

    /// Return a lease to the pool. Equivalent to dropping it.
    pub fn release(&self, lease: IdentityLease) {
        drop(lease);
    }

    /// Resolves after the next release (or immediately if one happened since the last wait).
    pub async fn wait_for_release(&self) {
        self.released.notified().await;
    }

    // --- Diagnostics ---

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn leased_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_leased()).count()
    }

    pub fn free_count(&self) -> usize {
        self.size() - self.leased_count()
    }

    pub fn addresses(&self) -> Vec<H160> {
        self.slots.iter().map(|s| s.identity.address()).collect()
    }

    /// Lifetime lease count per identity, in pool order.
    pub fn lease_counts(&self) -> Vec<(H160, u64)> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.identity.address(),
                    s.leases_total.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    pub(crate) fn make_test_pool(n: usize) -> IdentityPool {
        IdentityPool::new((0..n).map(|_| SigningIdentity::random()).collect())
    }

    #[test]
    fn test_acquire_marks_leased_and_drop_releases() {
        let pool = make_test_pool(2);
        let lease = pool.acquire().unwrap();
        assert_eq!(pool.leased_count(), 1);
        assert_eq!(pool.free_count(), 1);
        drop(lease);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn test_lease_tracks_hold_time() {
        let pool = make_test_pool(1);
        let lease = pool.acquire().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(lease.held_for() >= Duration::from_millis(5));
    }

    #[test]
    fn test_acquire_exhausted_returns_none() {
        let pool = make_test_pool(2);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_acquire_empty_pool_returns_none() {
        let pool = make_test_pool(0);
        assert!(pool.is_empty());
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_concurrent_leases_are_distinct() {
        let pool = make_test_pool(3);
        let leases: Vec<IdentityLease> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        let unique: HashSet<H160> = leases.iter().map(|l| l.address()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_release_is_idempotent_for_stale_generation() {
        let pool = make_test_pool(1);
        let lease = pool.acquire().unwrap();
        let slot = Arc::clone(&lease.slot);
        let stale = lease.generation;
        pool.release(lease);
        assert!(!slot.is_leased());

        // A second release of the same lease does nothing.
        assert!(!slot.release(stale));
        assert!(!slot.is_leased());

        // Nor does it free a newer lease on the same identity.
        let again = pool.acquire().unwrap();
        assert!(!slot.release(stale));
        assert!(slot.is_leased());
        drop(again);
        assert!(!slot.is_leased());
    }

    #[test]
    fn test_round_robin_does_not_starve() {
        let pool = make_test_pool(3);
        for _ in 0..30 {
            let lease = pool.acquire().unwrap();
            pool.release(lease);
        }
        for (_, count) in pool.lease_counts() {
            assert_eq!(count, 10);
        }
    }

    #[test]
    fn test_mutual_exclusion_under_thread_contention() {
        let pool = Arc::new(make_test_pool(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        if let Some(lease) = pool.acquire() {
                            assert!(pool.leased_count() <= pool.size());
                            drop(lease);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.leased_count(), 0);

        // Every successful CAS produced exactly one release: generations are all even.
        for slot in &pool.slots {
            assert_eq!(slot.state.load(Ordering::SeqCst) % 2, 0);
        }
    }

    #[tokio::test]
    async fn test_wait_for_release_wakes_on_drop() {
        let pool = Arc::new(make_test_pool(1));
        let lease = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.wait_for_release().await;
                pool.acquire().is_some()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lease);

        let reacquired = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(reacquired);
    }
}
