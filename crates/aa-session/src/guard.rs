//! Single in-flight operation guard.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Admits at most one operation at a time.
///
/// Acquisition never waits: a second caller is turned away and decides
/// itself whether to retry.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    /// Create an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard, or `None` if an operation is already in flight.
    ///
    /// The returned guard is owned, so cleanup work spawned after the
    /// operation can keep holding the claim.
    #[must_use]
    pub fn try_acquire(&self) -> Option<InFlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    /// Whether an operation is in flight.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the claim when dropped, including when the owning future is
/// cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
