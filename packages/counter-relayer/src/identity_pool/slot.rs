//! Identity slot and RAII lease types.

use crate::identity::SigningIdentity;
use primitive_types::H160;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A single identity in the pool.
pub struct IdentitySlot {
    pub(crate) identity: Arc<SigningIdentity>,
    /// Lease generation. Even = free, odd = leased.
    pub(crate) state: AtomicU64,
    pub(crate) leases_total: AtomicU64,
}

impl IdentitySlot {
    pub(crate) fn new(identity: SigningIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            state: AtomicU64::new(0),
            leases_total: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_leased(&self) -> bool {
        self.state.load(Ordering::Acquire) % 2 == 1
    }

    /// Free → leased in one CAS. Returns the new lease generation.
    pub(crate) fn try_lease(&self) -> Option<u64> {
        let current = self.state.load(Ordering::Acquire);
        if current % 2 == 1 {
            return None;
        }
        self.state
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                self.leases_total.fetch_add(1, Ordering::Relaxed);
                current + 1
            })
    }

    /// Leased → free, only if `generation` is still the live lease.
    /// Stale or repeated releases are no-ops and return `false`.
    pub(crate) fn release(&self, generation: u64) -> bool {
        self.state
            .compare_exchange(generation, generation + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// RAII lease from [`IdentityPool::acquire`](super::IdentityPool::acquire).
/// Frees the identity and wakes the dispatcher on drop.
pub struct IdentityLease {
    pub(crate) slot: Arc<IdentitySlot>,
    pub(crate) generation: u64,
    pub(crate) acquired_at: Instant,
    pub(crate) released: Arc<Notify>,
}

impl IdentityLease {
    pub fn identity(&self) -> &SigningIdentity {
        &self.slot.identity
    }

    pub fn address(&self) -> H160 {
        self.slot.identity.address()
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        if self.slot.release(self.generation) {
            self.released.notify_one();
        }
    }
}

impl std::fmt::Debug for IdentityLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityLease")
            .field("address", &self.address())
            .field("generation", &self.generation)
            .finish()
    }
}
