//! Identifier types for runtime entities.
//!
//! Worker ids are drawn from a process-global counter, so an id is never
//! reused within a process and a parent can key its pending-children set on
//! them without generation tracking.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static WORKER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a branch worker.
///
/// Every branch minted by a generator gets a fresh id, whether it ends up on
/// its own worker thread or runs in line under the sync fallback.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocates the next process-unique worker id.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(WORKER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a worker id for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u64) -> Self {
        Self(index)
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkerId({})", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}
