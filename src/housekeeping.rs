//! Cooperative cancellation handle for long-running housekeeping passes.
//!
//! The scheduler itself lives on [`crate::registry::Registry`], keeping the
//! housekeeping timer and single-flight guard inside the provider rather
//! than a separate object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, `Clone`-able flag a caller can use to ask a long-running
/// housekeeping job to stop early. Checked on a best-effort basis; callers
/// that never construct one (`None`) get housekeeping that always runs to
/// completion.
#[derive(Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled_and_latches_once_cancelled() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
