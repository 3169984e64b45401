//! Fan-out credit: the shared concurrency budget of a branch scope.
//!
//! One credit funds one live worker. Acquisition is non-blocking; a scope
//! that cannot take a credit falls back to waiting on a pending child or to
//! in-line execution. Each credit is returned to its pool exactly once, when
//! the permit drops inside the worker frame.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared handle to a credit pool.
pub type CreditHandle = Arc<CreditPool>;

/// A shared counter of spare workers a branch scope may put to work.
///
/// The counter never goes below zero: acquisition is a checked decrement.
/// Nested scopes replace the handle rather than mutating the enclosing pool.
#[derive(Debug)]
pub struct CreditPool {
    available: AtomicUsize,
    initial: usize,
}

impl CreditPool {
    /// Creates a pool funding `n` concurrent workers.
    #[must_use]
    pub fn handle(n: usize) -> CreditHandle {
        Arc::new(Self {
            available: AtomicUsize::new(n),
            initial: n,
        })
    }

    /// Takes one credit without blocking. Returns `None` when the pool is dry.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Credit> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|_| Credit {
                pool: Arc::clone(self),
            })
    }

    /// Returns the number of spare credits right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    /// Returns the pool size at creation.
    #[must_use]
    pub const fn initial(&self) -> usize {
        self.initial
    }

    fn release(&self) {
        self.available.fetch_add(1, Ordering::AcqRel);
    }
}

/// One unit of fan-out credit.
///
/// Returned to its pool exactly once, on drop.
#[derive(Debug)]
#[must_use = "a credit funds a worker; dropping it returns the credit"]
pub struct Credit {
    pool: CreditHandle,
}

impl Drop for Credit {
    fn drop(&mut self) {
        self.pool.release();
    }
}
